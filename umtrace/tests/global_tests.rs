//! Integration tests for the process-wide tracer instance.
//!
//! The instance and the output callback are global, so every test takes `TEST_LOCK` and
//! starts from a fresh `init`. The output callback captures into `CAPTURED`.

use core::alloc::{GlobalAlloc, Layout};
use core::ffi::c_void;
use std::alloc::System;
use std::sync::{Mutex, MutexGuard};

use umtrace::global::{self, TracingAlloc};
use umtrace::{sink, CallFrame, Config, Error, Fault, Frames, SymbolEntry, SymbolMap, Tracked};

static TEST_LOCK: Mutex<()> = Mutex::new(());
static CAPTURED: Mutex<Vec<u8>> = Mutex::new(Vec::new());
static FAULTS: Mutex<Vec<Fault>> = Mutex::new(Vec::new());

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn capture(byte: u8) {
    lock(&CAPTURED).push(byte);
}

fn record_fault(fault: &Fault, _frames: Frames<'_>) {
    lock(&FAULTS).push(*fault);
}

fn captured() -> Vec<u8> {
    core::mem::take(&mut *lock(&CAPTURED))
}

/// Serializes the test and gives it a fresh instance.
fn setup(config: Config) -> MutexGuard<'static, ()> {
    let guard = lock(&TEST_LOCK);
    // only the first test gets to install it
    let _ = sink::install_output(capture);
    let _ = global::shutdown();
    global::init(config).unwrap();
    global::set_fault_hook(Some(record_fault));
    captured();
    lock(&FAULTS).clear();
    guard
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_uninitialized_calls_are_noops() {
    let _guard = setup(Config::default());
    global::shutdown().unwrap();

    assert!(!global::is_initialized());
    assert_eq!(global::on_enter(0x10, 0x100), None);
    assert_eq!(global::depth(), 0);
    assert_eq!(global::frame_at(0), None);
    assert_eq!(global::freeze(), Err(Error::NotInitialized));
    assert_eq!(global::resume(0), Err(Error::NotInitialized));
    assert_eq!(global::unwind_to(0x1), Err(Error::NotInitialized));
    assert_eq!(global::print_stack_trace(), Err(Error::NotInitialized));
    assert_eq!(global::phase_level(), None);

    global::trace_malloc(0x2000 as *const c_void, 16);
    assert!(captured().is_empty());
}

#[test]
fn test_init_and_shutdown_once() {
    let _guard = setup(Config::default());
    assert!(global::is_initialized());
    assert_eq!(global::init(Config::default()), Err(Error::AlreadyInitialized));

    assert_eq!(global::shutdown(), Ok(()));
    assert_eq!(global::shutdown(), Err(Error::NotInitialized));
}

#[test]
fn test_is_initialized_is_not_a_missed_call() {
    let _guard = setup(Config::default());
    assert!(global::is_initialized());
    global::shutdown().unwrap();
    assert!(!global::is_initialized());
    assert_eq!(global::missed(), 0);
}

#[test]
fn test_output_installs_once() {
    let _guard = setup(Config::default());
    assert!(sink::has_output());
    assert_eq!(sink::install_output(capture), Err(Error::AlreadyInstalled));
}

// =============================================================================
// Shadow Stack Tests
// =============================================================================

#[test]
fn test_hooks_drive_the_shadow_stack() {
    let _guard = setup(Config::default());
    assert_eq!(global::on_enter(0x10, 0x100), Some(Tracked::Recorded));
    assert_eq!(global::on_enter(0x110, 0x200), Some(Tracked::Recorded));
    assert_eq!(global::depth(), 2);
    assert_eq!(global::active_calls(), 2);
    assert_eq!(global::frame_at(0), Some(CallFrame::new(0x110, 0x200)));

    global::on_exit(0x110, 0x200);
    global::on_exit(0x10, 0x100);
    assert_eq!(global::depth(), 0);
    assert_eq!(global::missed(), 0);
}

#[test]
fn test_fault_hook_receives_breakpoint() {
    let _guard = setup(Config::default());
    global::set_breakpoint(2);
    global::on_enter(0x10, 0x100);
    global::on_enter(0x110, 0x200);
    assert_eq!(*lock(&FAULTS), [Fault::DepthBreakpoint { depth: 2 }]);

    global::clear_breakpoint();
    global::on_enter(0x210, 0x300);
    assert_eq!(lock(&FAULTS).len(), 1);
}

#[test]
fn test_fault_hook_receives_mismatch() {
    let _guard = setup(Config::default());
    global::on_enter(0x10, 0x100);
    global::on_exit(0x20, 0x200);
    assert_eq!(
        *lock(&FAULTS),
        [Fault::FrameMismatch {
            expected: CallFrame::new(0x10, 0x100),
            actual: CallFrame::new(0x20, 0x200),
        }]
    );
}

#[test]
fn test_exclude_through_global() {
    let _guard = setup(Config::default());
    global::exclude(0x700).unwrap();
    assert_eq!(global::on_enter(0x10, 0x700), Some(Tracked::Skipped));
}

#[test]
fn test_checkpoint_and_unwind() {
    let _guard = setup(Config::default());
    global::on_enter(0x10, 0x100);
    global::checkpoint(0xb0);
    global::on_enter(0x110, 0x200);
    global::on_enter(0x210, 0x300);

    assert_eq!(global::unwind_to(0xb0), Ok(1));
    assert_eq!(global::depth(), 1);
    assert_eq!(global::unwind_to(0xc0), Err(Error::UnknownCheckpoint(0xc0)));
    assert_eq!(*lock(&FAULTS), [Fault::UnknownCheckpoint { id: 0xc0 }]);
}

#[test]
fn test_freeze_and_resume() {
    let _guard = setup(Config::default());
    global::on_enter(0x10, 0x100);
    global::on_enter(0x110, 0x200);
    assert_eq!(global::freeze(), Ok(2));
    assert_eq!(global::freeze(), Err(Error::AlreadyFrozen));

    global::on_exit(0x110, 0x200);
    assert_eq!(global::depth(), 2);
    assert_eq!(global::resume(3), Ok(()));
    assert_eq!(global::depth(), 1);
    assert_eq!(global::resume(3), Err(Error::NotFrozen));
}

// =============================================================================
// Symbol And Trace Output Tests
// =============================================================================

static ENTRIES: [SymbolEntry<'static>; 2] = [
    SymbolEntry {
        start: 0x1000,
        size: 0x100,
        name: "main",
    },
    SymbolEntry {
        start: 0x2000,
        size: 0x80,
        name: "foo",
    },
];
static SYMBOLS: SymbolMap<'static> = SymbolMap::new(&ENTRIES);

#[test]
fn test_print_stack_trace_to_output() {
    let _guard = setup(Config::default());
    global::set_symbols(&SYMBOLS);
    global::on_enter(0x500, 0x1000);
    global::on_enter(0x1010, 0x2000);

    global::print_stack_trace().unwrap();
    let text = String::from_utf8(captured()).unwrap();
    assert_eq!(
        text,
        "foo (    2000) <- main+10 (    1010)\r\n\
         main (    1000) <- <UNKNOWN>+0 (     500)\r\n"
    );
}

#[test]
fn test_resolve_symbol() {
    let _guard = setup(Config::default());
    assert_eq!(global::resolve_symbol(0x2010), None);

    global::set_symbols(&SYMBOLS);
    assert_eq!(global::resolve_symbol(0x2010), Some("foo"));
    assert_eq!(global::resolve_symbol(0x2080), None);
}

// =============================================================================
// Allocation Tracer Tests
// =============================================================================

#[test]
fn test_malloc_reaches_output() {
    let _guard = setup(Config::default());
    global::trace_malloc(0x2000 as *const c_void, 16);
    assert_eq!(captured(), [1, 1, 0, 0, 0x20, 0, 0, 0, 0, 0x10]);
}

#[test]
fn test_null_free_carries_current_stack() {
    let _guard = setup(Config::default());
    global::on_enter(0x300, 0x400);
    global::on_enter(0x100, 0x200);
    global::trace_free(core::ptr::null());
    assert_eq!(
        captured(),
        [2, 0x81, 0, 2, 1, 0, 2, 0, 3, 0, 4, 0, 0, 0, 0, 0]
    );
}

#[test]
fn test_phases_and_tracing_switch() {
    let _guard = setup(Config::default());
    global::begin_phase("net");
    assert_eq!(global::phase_level(), Some(2));
    global::end_phase();
    assert_eq!(captured(), [0, 2, 0, 3, b'n', b'e', b't', 5, 2]);

    global::set_tracing(false);
    global::trace_malloc(0x2000 as *const c_void, 16);
    assert!(captured().is_empty());
    global::set_tracing(true);
    global::trace_calloc(0x2000 as *const c_void, 1, 4);
    assert_eq!(captured().len(), 14);
}

#[test]
fn test_tracing_alloc_wraps_global_allocator() {
    let _guard = setup(Config::default());
    let alloc = TracingAlloc(System);
    let layout = Layout::from_size_align(24, 8).unwrap();

    unsafe {
        let p = alloc.alloc(layout);
        assert!(!p.is_null());
        let bytes = captured();
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[..2], [1, 1]);
        assert_eq!(bytes[6..], [0, 0, 0, 24]);

        let p = alloc.realloc(p, layout, 48);
        let bytes = captured();
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[10..], [0, 0, 0, 48]);

        alloc.dealloc(p, Layout::from_size_align(48, 8).unwrap());
        assert_eq!(captured().len(), 6);

        let z = alloc.alloc_zeroed(layout);
        let bytes = captured();
        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[6..], [0, 0, 0, 1, 0, 0, 0, 24]);
        alloc.dealloc(z, layout);
    }
}
