//! Process-wide tracer instance.
//!
//! Instrumentation hooks and allocator wrappers have no way to receive a context argument,
//! so firmware usually drives a single instance living in a static. It is created by
//! [`init`] and torn down by [`shutdown`]; before `init` every function here is a no-op.
//!
//! Output goes to the callback installed with [`sink::install_output`](crate::sink::install_output).
//!
//! Locks are only ever tried, never waited for: a hook re-entering while another one holds
//! the state (an instrumented interrupt handler without `interrupt-safe`, or a fault handler
//! calling instrumented code) is dropped and counted in [`missed`].

use core::alloc::{GlobalAlloc, Layout};
use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::config::Config;
use crate::error::Error;
use crate::fault::{self, Fault, FaultHandler};
use crate::memtrace::MemTracer;
use crate::monitor::{Monitor, Tracked};
#[cfg(feature = "interrupt-safe")]
use crate::platform::IrqGuard;
use crate::sink::{CallbackSink, Console};
use crate::stack::{CallFrame, Frames};
use crate::symbols::{NoSymbols, SymbolTable};
use crate::Address;

/// Custom fault reaction for the process-wide instance.
pub type FaultHook = fn(&Fault, Frames<'_>);

static NO_SYMBOLS: NoSymbols = NoSymbols;

static STATE: Mutex<Option<State>> = Mutex::new(None);
static MISSED: AtomicUsize = AtomicUsize::new(0);

struct State {
    monitor: Monitor<GlobalFaults>,
    mem: MemTracer<CallbackSink>,
}

/// Reports through the output callback and halts on fatal faults, unless a hook is set.
struct GlobalFaults {
    hook: Option<FaultHook>,
    symbols: &'static (dyn SymbolTable + Sync),
}

impl FaultHandler for GlobalFaults {
    fn on_fault(&mut self, fault: &Fault, frames: Frames<'_>) {
        if let Some(hook) = self.hook {
            hook(fault, frames);
            return;
        }
        let _ = fault::report(&mut Console(CallbackSink), self.symbols, fault, frames);
        if fault.is_fatal() {
            fault::halt();
        }
    }
}

fn with_state<R>(f: impl FnOnce(&mut State) -> R) -> Option<R> {
    #[cfg(feature = "interrupt-safe")]
    let _irq: IrqGuard = IrqGuard::new();

    let Some(mut guard) = STATE.try_lock() else {
        MISSED.fetch_add(1, Ordering::Relaxed);
        return None;
    };
    guard.as_mut().map(f)
}

/// Creates the process-wide instance.
pub fn init(config: Config) -> Result<(), Error> {
    #[cfg(feature = "interrupt-safe")]
    let _irq: IrqGuard = IrqGuard::new();

    let mut state = STATE.lock();
    if state.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    let faults = GlobalFaults {
        hook: None,
        symbols: &NO_SYMBOLS,
    };
    *state = Some(State {
        monitor: Monitor::new(config, faults),
        mem: MemTracer::new(CallbackSink, &config),
    });
    MISSED.store(0, Ordering::Relaxed);
    info!(
        "umtrace initialized: {} frames, {} checkpoints, allocation tracing {}",
        crate::DEFAULT_STACK_DEPTH,
        crate::DEFAULT_JUMP_SLOTS,
        if config.trace_allocations { "on" } else { "off" }
    );
    Ok(())
}

/// Drops the process-wide instance. Hooks become no-ops again.
pub fn shutdown() -> Result<(), Error> {
    #[cfg(feature = "interrupt-safe")]
    let _irq: IrqGuard = IrqGuard::new();

    match STATE.lock().take() {
        Some(_) => {
            info!("umtrace shut down");
            Ok(())
        }
        None => Err(Error::NotInitialized),
    }
}

/// A busy lock counts as initialized and is not recorded in [`missed`].
pub fn is_initialized() -> bool {
    STATE.try_lock().map_or(true, |state| state.is_some())
}

/// Hook invocations dropped because the state was busy.
pub fn missed() -> usize {
    MISSED.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Shadow call stack
// ---------------------------------------------------------------------------

/// Entry hook. `None` before [`init`] or when dropped.
pub fn on_enter(call_site: Address, target: Address) -> Option<Tracked> {
    with_state(|s| s.monitor.on_enter(call_site, target))
}

/// Exit hook.
pub fn on_exit(call_site: Address, target: Address) {
    with_state(|s| s.monitor.on_exit(call_site, target));
}

pub fn checkpoint(id: usize) {
    with_state(|s| s.monitor.checkpoint(id));
}

pub fn unwind_to(id: usize) -> Result<usize, Error> {
    with_state(|s| s.monitor.unwind_to(id)).unwrap_or(Err(Error::NotInitialized))
}

/// Makes the hooks ignore the function at `addr`, typically `setjmp` and `longjmp`.
pub fn exclude(addr: Address) -> Result<(), Error> {
    with_state(|s| s.monitor.exclude(addr)).unwrap_or(Err(Error::NotInitialized))
}

pub fn set_breakpoint(depth: usize) {
    with_state(|s| s.monitor.set_breakpoint(depth));
}

pub fn clear_breakpoint() {
    with_state(|s| s.monitor.clear_breakpoint());
}

/// Recorded frames; 0 before [`init`].
pub fn depth() -> usize {
    with_state(|s| s.monitor.depth()).unwrap_or(0)
}

pub fn active_calls() -> usize {
    with_state(|s| s.monitor.active_calls()).unwrap_or(0)
}

pub fn frame_at(index: usize) -> Option<CallFrame> {
    with_state(|s| s.monitor.frame_at(index)).flatten()
}

pub fn freeze() -> Result<usize, Error> {
    with_state(|s| s.monitor.freeze()).unwrap_or(Err(Error::NotInitialized))
}

pub fn resume(status: i32) -> Result<(), Error> {
    with_state(|s| s.monitor.resume(status)).unwrap_or(Err(Error::NotInitialized))
}

/// Prints the symbolized stack through the output callback.
pub fn print_stack_trace() -> Result<(), Error> {
    with_state(|s| {
        let symbols = s.monitor.handler().symbols;
        // Console over a callback never fails
        let _ = s.monitor.print_stack_trace(&mut Console(CallbackSink), symbols);
    })
    .ok_or(Error::NotInitialized)
}

/// Sets the table used for stack traces and [`resolve_symbol`].
pub fn set_symbols(symbols: &'static (dyn SymbolTable + Sync)) {
    with_state(|s| s.monitor.handler_mut().symbols = symbols);
}

pub fn resolve_symbol(addr: Address) -> Option<&'static str> {
    with_state(|s| s.monitor.handler().symbols)?.resolve(addr)
}

/// Replaces the default report-and-halt reaction. `None` restores it.
pub fn set_fault_hook(hook: Option<FaultHook>) {
    with_state(|s| s.monitor.handler_mut().hook = hook);
}

// ---------------------------------------------------------------------------
// Allocation tracer
// ---------------------------------------------------------------------------

pub fn begin_phase(label: &str) {
    begin_phase_bytes(label.as_bytes());
}

pub fn begin_phase_bytes(label: &[u8]) {
    with_state(|s| s.mem.begin_phase_bytes(label));
}

pub fn end_phase() {
    with_state(|s| s.mem.end_phase());
}

/// Explicit allocation-tracing switch, independent of the phase level.
pub fn set_tracing(enabled: bool) {
    with_state(|s| s.mem.set_enabled(enabled));
}

pub fn phase_level() -> Option<u8> {
    with_state(|s| s.mem.level())
}

pub fn trace_malloc(ptr: *const c_void, size: usize) {
    with_state(|s| s.mem.trace_malloc(ptr, size));
}

pub fn trace_calloc(ptr: *const c_void, nmemb: usize, size: usize) {
    with_state(|s| s.mem.trace_calloc(ptr, nmemb, size));
}

/// A null `ptr` carries the current shadow stack along.
pub fn trace_free(ptr: *const c_void) {
    with_state(|s| s.mem.trace_free(ptr, s.monitor.frames()));
}

pub fn trace_realloc(new_ptr: *const c_void, old_ptr: *const c_void, size: usize) {
    with_state(|s| s.mem.trace_realloc(new_ptr, old_ptr, size));
}

/// Global allocator wrapper reporting to the process-wide instance.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: umtrace::global::TracingAlloc<MyHeap> = umtrace::global::TracingAlloc(MyHeap::new());
/// ```
pub struct TracingAlloc<A>(pub A);

unsafe impl<A: GlobalAlloc> GlobalAlloc for TracingAlloc<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.0.alloc(layout);
        trace_malloc(ptr as *const c_void, layout.size());
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.0.alloc_zeroed(layout);
        trace_calloc(ptr as *const c_void, 1, layout.size());
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        trace_free(ptr as *const c_void);
        self.0.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.0.realloc(ptr, layout, new_size);
        trace_realloc(new_ptr as *const c_void, ptr as *const c_void, new_size);
        new_ptr
    }
}
