//! Integration tests for the allocation tracer and its wire format.

use core::ffi::c_void;

use umtrace::{
    AddrWidth, BufferSink, ByteSink, CallFrame, Config, Frames, MemTracer, RawAllocator,
    ShadowStack, TracedAllocator,
};

/// Growable capture sink.
#[derive(Default)]
struct Capture(Vec<u8>);

impl ByteSink for Capture {
    fn put(&mut self, byte: u8) {
        self.0.push(byte);
    }
}

fn tracer() -> MemTracer<Capture> {
    MemTracer::new(Capture::default(), &Config::default())
}

fn ptr(addr: usize) -> *const c_void {
    addr as *const c_void
}

fn take(t: &mut MemTracer<Capture>) -> Vec<u8> {
    core::mem::take(&mut t.sink_mut().0)
}

// =============================================================================
// Record Encoding Tests
// =============================================================================

#[test]
fn test_malloc_record() {
    let mut t = tracer();
    t.trace_malloc(ptr(0x2000), 16);
    assert_eq!(
        take(&mut t),
        [0x01, 0x01, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x10]
    );
}

#[test]
fn test_calloc_record() {
    let mut t = tracer();
    t.trace_calloc(ptr(0x3000), 4, 8);
    assert_eq!(take(&mut t), [4, 1, 0, 0, 0x30, 0, 0, 0, 0, 4, 0, 0, 0, 8]);
}

#[test]
fn test_realloc_record() {
    let mut t = tracer();
    t.trace_realloc(ptr(0x4000), ptr(0x3000), 64);
    assert_eq!(
        take(&mut t),
        [3, 1, 0, 0, 0x40, 0, 0, 0, 0x30, 0, 0, 0, 0, 0x40]
    );
}

#[test]
fn test_free_record_without_trace() {
    let mut stack: ShadowStack<4> = ShadowStack::new();
    stack.push(CallFrame::new(0x300, 0x400)).unwrap();

    let mut t = tracer();
    t.trace_free(ptr(0x1000), stack.frames());
    assert_eq!(take(&mut t), [2, 1, 0, 0, 0x10, 0]);
}

#[test]
fn test_null_free_carries_stack_trace() {
    let mut stack: ShadowStack<4> = ShadowStack::new();
    stack.push(CallFrame::new(0x300, 0x400)).unwrap();
    stack.push(CallFrame::new(0x100, 0x200)).unwrap();

    let mut t = tracer();
    t.trace_free(core::ptr::null(), stack.frames());
    assert_eq!(
        take(&mut t),
        [
            0x02, 0x81, 0x00, 0x02, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00,
            0x00, 0x00
        ]
    );
}

#[test]
fn test_null_free_with_empty_stack() {
    let mut t = tracer();
    t.trace_free(core::ptr::null(), Frames::empty());
    assert_eq!(take(&mut t), [2, 0x81, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_wide_trace_addresses() {
    let frames = [CallFrame::new(0x100, 0x200)];
    let config = Config::default().with_addr_width(AddrWidth::U32);
    let mut t = MemTracer::new(Capture::default(), &config);
    t.trace_free(core::ptr::null(), Frames::new(&frames));
    assert_eq!(
        take(&mut t),
        [2, 0x81, 0, 1, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 0, 0]
    );
}

// =============================================================================
// Phase Level Tests
// =============================================================================

#[test]
fn test_phase_levels_nest() {
    let mut t = tracer();
    assert_eq!(t.level(), 1);

    t.begin_phase("a");
    assert_eq!(take(&mut t), [0, 2, 0, 1, b'a']);
    t.begin_phase("bc");
    assert_eq!(take(&mut t), [0, 3, 0, 2, b'b', b'c']);

    t.trace_malloc(ptr(0x10), 1);
    assert_eq!(take(&mut t)[..2], [1, 3]);

    t.end_phase();
    assert_eq!(take(&mut t), [5, 3]);
    t.end_phase();
    assert_eq!(take(&mut t), [5, 2]);
    assert_eq!(t.level(), 1);
}

#[test]
fn test_level_zero_suppresses_output() {
    let mut t = tracer();
    t.end_phase();
    assert_eq!(take(&mut t), [5, 1]);
    assert_eq!(t.level(), 0);
    assert!(!t.is_active());

    t.trace_malloc(ptr(0x10), 1);
    t.trace_calloc(ptr(0x20), 2, 8);
    t.trace_realloc(ptr(0x30), ptr(0x20), 32);
    t.trace_free(ptr(0x30), Frames::empty());
    let frames = [CallFrame::new(0x100, 0x200)];
    t.trace_free(core::ptr::null(), Frames::new(&frames));
    t.end_phase();
    assert!(take(&mut t).is_empty());
    assert_eq!(t.level(), 0);

    t.begin_phase("x");
    assert_eq!(take(&mut t), [0, 1, 0, 1, b'x']);
}

#[test]
fn test_disabled_tracer_is_silent() {
    let config = Config::default().with_allocation_tracing(false);
    let mut t = MemTracer::new(Capture::default(), &config);
    t.trace_malloc(ptr(0x10), 1);
    t.begin_phase("quiet");
    assert!(take(&mut t).is_empty());
    // the level still moves
    assert_eq!(t.level(), 2);

    t.set_enabled(true);
    t.trace_malloc(ptr(0x10), 1);
    assert_eq!(take(&mut t)[..2], [1, 2]);
}

#[test]
fn test_non_utf8_phase_label() {
    let mut t = tracer();
    t.begin_phase_bytes(&[0xff, 0x00]);
    assert_eq!(take(&mut t), [0, 2, 0, 2, 0xff, 0x00]);
}

#[test]
fn test_bounded_sink_counts_dropped_bytes() {
    let mut t = MemTracer::new(BufferSink::<8>::new(), &Config::default());
    t.trace_malloc(ptr(0x10), 1);
    assert_eq!(t.sink().as_bytes().len(), 8);
    assert_eq!(t.sink().dropped(), 2);
}

// =============================================================================
// Traced Allocator Tests
// =============================================================================

/// Hands out fixed addresses and logs what it was asked.
#[derive(Default)]
struct FakeHeap {
    calls: Vec<&'static str>,
}

unsafe impl RawAllocator for FakeHeap {
    unsafe fn malloc(&mut self, _size: usize) -> *mut c_void {
        self.calls.push("malloc");
        0x1000 as *mut c_void
    }

    unsafe fn calloc(&mut self, _nmemb: usize, _size: usize) -> *mut c_void {
        self.calls.push("calloc");
        0x2000 as *mut c_void
    }

    unsafe fn free(&mut self, _ptr: *mut c_void) {
        self.calls.push("free");
    }

    unsafe fn realloc(&mut self, _ptr: *mut c_void, _size: usize) -> *mut c_void {
        self.calls.push("realloc");
        0x3000 as *mut c_void
    }
}

#[test]
fn test_traced_allocator_forwards_and_records() {
    let mut alloc = TracedAllocator::new(FakeHeap::default(), tracer());

    let p = unsafe { alloc.malloc(16) };
    assert_eq!(p as usize, 0x1000);
    let q = unsafe { alloc.calloc(2, 8) };
    let r = unsafe { alloc.realloc(q, 32) };
    assert_eq!(r as usize, 0x3000);
    unsafe { alloc.free(p, Frames::empty()) };

    let (heap, mut t) = alloc.into_parts();
    assert_eq!(heap.calls, ["malloc", "calloc", "realloc", "free"]);

    let bytes = take(&mut t);
    let ops: Vec<u8> = [0usize, 10, 24, 38].iter().map(|&i| bytes[i]).collect();
    assert_eq!(ops, [1, 4, 3, 2]);
    assert_eq!(bytes.len(), 10 + 14 + 14 + 6);
    // realloc reports the new block first
    assert_eq!(bytes[26..34], [0, 0, 0x30, 0, 0, 0, 0x20, 0]);
}

#[test]
fn test_traced_allocator_null_free_has_trace() {
    let frames = [CallFrame::new(0x100, 0x200)];
    let mut alloc = TracedAllocator::new(FakeHeap::default(), tracer());
    unsafe { alloc.free(core::ptr::null_mut(), Frames::new(&frames)) };

    assert_eq!(alloc.tracer().sink().0[1], 0x81);
    alloc.tracer_mut().set_enabled(false);
    unsafe { alloc.free(core::ptr::null_mut(), Frames::new(&frames)) };
    assert_eq!(alloc.tracer().sink().0.len(), 12);
}
