//! umtrace as a static library, so it can be linked into C firmware.
//!
//! Build the firmware with `-finstrument-functions` (and `-fno-optimize-sibling-calls`),
//! but NOT this library: the hooks must never instrument themselves.
//! The allocation tracer is reached through the `mt_*` functions, or transparently through
//! the newlib `--wrap` shims with the `newlib-wrap` feature.
//!
//! All functions are safe to call before `umon_init`; they do nothing then.

#![no_std]

use core::ffi::{c_char, c_int, c_uint, c_void, CStr};

use spin::Once;
use umtrace::{global, sink, Config};

/// Character output function of the firmware, e.g. a UART putc.
pub type UmonOutput = extern "C" fn(c_char);
/// Character input function. Returns a negative value when nothing was received.
pub type UmonInput = extern "C" fn() -> c_int;

pub const UMON_OK: c_int = 0;
pub const UMON_ERR: c_int = -1;

static C_OUTPUT: Once<UmonOutput> = Once::new();
static C_INPUT: Once<UmonInput> = Once::new();

fn forward_output(byte: u8) {
    if let Some(out) = C_OUTPUT.get() {
        out(byte as c_char)
    }
}

fn forward_input() -> i32 {
    C_INPUT.get().map_or(-1, |input| input())
}

fn status<T>(res: Result<T, umtrace::Error>) -> c_int {
    match res {
        Ok(_) => UMON_OK,
        Err(_) => UMON_ERR,
    }
}

// Instrumentation hooks, called by code compiled with -finstrument-functions

#[no_mangle]
pub extern "C" fn __cyg_profile_func_enter(this_fn: *mut c_void, call_site: *mut c_void) {
    global::on_enter(call_site as usize, this_fn as usize);
}

#[no_mangle]
pub extern "C" fn __cyg_profile_func_exit(this_fn: *mut c_void, call_site: *mut c_void) {
    global::on_exit(call_site as usize, this_fn as usize);
}

// Monitor interface

/// Installs the console callbacks and starts tracing.
///
/// Callbacks can only be installed once per boot; later calls keep the first ones.
#[no_mangle]
pub extern "C" fn umon_init(output: Option<UmonOutput>, input: Option<UmonInput>) -> c_int {
    if let Some(output) = output {
        C_OUTPUT.call_once(|| output);
        // a second install keeps the first callback, which forwards to C_OUTPUT anyway
        let _ = sink::install_output(forward_output);
    }
    if let Some(input) = input {
        C_INPUT.call_once(|| input);
        let _ = sink::install_input(forward_input);
    }
    let config = Config::default().with_thumb_bit_stripped(cfg!(target_arch = "arm"));
    status(global::init(config))
}

#[no_mangle]
pub extern "C" fn umon_shutdown() -> c_int {
    status(global::shutdown())
}

#[no_mangle]
pub extern "C" fn umon_putc(c: c_char) {
    sink::putc(c as u8);
}

#[no_mangle]
pub extern "C" fn umon_getc() -> c_int {
    sink::getc()
}

/// Ignore `fn_addr` in the hooks. Meant for `setjmp`/`longjmp` themselves.
#[no_mangle]
pub extern "C" fn umon_exclude(fn_addr: *const c_void) -> c_int {
    status(global::exclude(fn_addr as usize))
}

/// To be called by the `setjmp` wrapper with the jump buffer address.
#[no_mangle]
pub extern "C" fn umon_handle_setjmp(jmpbuf: *const c_void) {
    global::checkpoint(jmpbuf as usize);
}

/// To be called once a `longjmp` to `jmpbuf` has landed.
#[no_mangle]
pub extern "C" fn umon_handle_longjmp(jmpbuf: *const c_void) -> c_int {
    status(global::unwind_to(jmpbuf as usize))
}

/// Freezes the shadow stack for reading. Returns its depth, or -1.
#[no_mangle]
pub extern "C" fn umon_trace_start() -> c_int {
    match global::freeze() {
        Ok(depth) => depth as c_int,
        Err(_) => UMON_ERR,
    }
}

/// Ends the read window opened by `umon_trace_start`.
#[no_mangle]
pub extern "C" fn umon_trace_end(stat: c_int) -> c_int {
    status(global::resume(stat))
}

#[no_mangle]
pub extern "C" fn umon_get_stack_depth() -> c_int {
    global::depth() as c_int
}

/// Reads frame `idx`, 0 being the innermost. Either pointer may be null.
///
/// # Safety
///
/// Non-null pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn umon_get_trace_entry(
    idx: c_uint,
    pto: *mut usize,
    pfrom: *mut usize,
) -> c_int {
    let Some(frame) = global::frame_at(idx as usize) else {
        return UMON_ERR;
    };
    if !pto.is_null() {
        *pto = frame.to;
    }
    if !pfrom.is_null() {
        *pfrom = frame.from;
    }
    UMON_OK
}

/// Breakpoint when the call depth reaches `depth`. A negative depth disables it.
#[no_mangle]
pub extern "C" fn umon_break_on_stack_depth(depth: c_int) {
    match usize::try_from(depth) {
        Ok(depth) => global::set_breakpoint(depth),
        Err(_) => global::clear_breakpoint(),
    }
}

#[no_mangle]
pub extern "C" fn umon_print_stack_trace() {
    let _ = global::print_stack_trace();
}

/// Copies the NUL-terminated name of the function containing `addr` into `buf`.
///
/// Returns the name length (possibly truncated to `len - 1`), or -1 if unknown.
///
/// # Safety
///
/// `buf` must be valid for `len` bytes of writes.
#[no_mangle]
pub unsafe extern "C" fn umon_get_function_name(
    addr: *const c_void,
    buf: *mut c_char,
    len: usize,
) -> c_int {
    let Some(name) = global::resolve_symbol(addr as usize) else {
        return UMON_ERR;
    };
    if buf.is_null() || len == 0 {
        return UMON_ERR;
    }
    let n = name.len().min(len - 1);
    core::ptr::copy_nonoverlapping(name.as_ptr(), buf as *mut u8, n);
    *buf.add(n) = 0;
    n as c_int
}

// Memory tracer interface

/// Switches allocation tracing on.
#[no_mangle]
pub extern "C" fn mt_init() {
    global::set_tracing(true);
}

/// Nonzero enables, zero disables allocation tracing.
#[no_mangle]
pub extern "C" fn mt_enable(on: c_int) {
    global::set_tracing(on != 0);
}

/// Opens a named phase. A null `label` is an empty name.
///
/// # Safety
///
/// A non-null `label` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn mt_start(label: *const c_char) {
    let label = if label.is_null() {
        &[][..]
    } else {
        CStr::from_ptr(label).to_bytes()
    };
    global::begin_phase_bytes(label);
}

#[no_mangle]
pub extern "C" fn mt_stop() {
    global::end_phase();
}

#[no_mangle]
pub extern "C" fn mt_trace_malloc(ptr: *const c_void, len: c_uint) {
    global::trace_malloc(ptr, len as usize);
}

#[no_mangle]
pub extern "C" fn mt_trace_calloc(ptr: *const c_void, nmemb: c_uint, size: c_uint) {
    global::trace_calloc(ptr, nmemb as usize, size as usize);
}

#[no_mangle]
pub extern "C" fn mt_trace_free(ptr: *const c_void) {
    global::trace_free(ptr);
}

#[no_mangle]
pub extern "C" fn mt_trace_realloc(newptr: *const c_void, oldptr: *const c_void, len: c_uint) {
    global::trace_realloc(newptr, oldptr, len as usize);
}

// newlib reentrant allocator shims, enabled with
// -Wl,--wrap=_malloc_r,--wrap=_calloc_r,--wrap=_free_r,--wrap=_realloc_r

#[cfg(feature = "newlib-wrap")]
mod newlib {
    use core::ffi::c_void;

    use umtrace::global;

    extern "C" {
        fn __real__malloc_r(r: *mut c_void, size: usize) -> *mut c_void;
        fn __real__calloc_r(r: *mut c_void, nelem: usize, elem_size: usize) -> *mut c_void;
        fn __real__free_r(r: *mut c_void, ptr: *mut c_void);
        fn __real__realloc_r(r: *mut c_void, ptr: *mut c_void, size: usize) -> *mut c_void;
    }

    #[no_mangle]
    pub unsafe extern "C" fn __wrap__malloc_r(r: *mut c_void, size: usize) -> *mut c_void {
        let ptr = __real__malloc_r(r, size);
        global::trace_malloc(ptr, size);
        ptr
    }

    #[no_mangle]
    pub unsafe extern "C" fn __wrap__calloc_r(
        r: *mut c_void,
        nelem: usize,
        elem_size: usize,
    ) -> *mut c_void {
        let ptr = __real__calloc_r(r, nelem, elem_size);
        global::trace_calloc(ptr, nelem, elem_size);
        ptr
    }

    #[no_mangle]
    pub unsafe extern "C" fn __wrap__free_r(r: *mut c_void, ptr: *mut c_void) {
        global::trace_free(ptr);
        __real__free_r(r, ptr);
    }

    #[no_mangle]
    pub unsafe extern "C" fn __wrap__realloc_r(
        r: *mut c_void,
        ptr: *mut c_void,
        size: usize,
    ) -> *mut c_void {
        let res = __real__realloc_r(r, ptr, size);
        global::trace_realloc(res, ptr, size);
        res
    }
}

// Need to define own panic handler, since we are no_std
#[cfg(feature = "panic-handler")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("{}", info);
    umtrace::fault::halt()
}
