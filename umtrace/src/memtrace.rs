//! Allocation tracer.
//!
//! Emits one [`MemoryEvent`] record per allocator call, tagged with a phase level. Phases are
//! opened with [`MemTracer::begin_phase`] and closed with [`MemTracer::end_phase`], letting a
//! host group events by what the firmware was doing at the time.
//!
//! Output is suppressed while the level is 0 or while tracing is switched off with
//! [`MemTracer::set_enabled`]. The level starts at 1.

use core::ffi::c_void;

use crate::config::Config;
use crate::protocol::{AddrWidth, Encoder, MemoryEvent};
use crate::sink::ByteSink;
use crate::stack::Frames;

/// Serializes allocation events to a sink.
pub struct MemTracer<S> {
    sink: S,
    level: u8,
    enabled: bool,
    width: AddrWidth,
}

impl<S: ByteSink> MemTracer<S> {
    pub fn new(sink: S, config: &Config) -> Self {
        Self {
            sink,
            level: 1,
            enabled: config.trace_allocations,
            width: config.addr_width,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// True when events currently reach the sink.
    pub fn is_active(&self) -> bool {
        self.enabled && self.level > 0
    }

    /// Opens a phase one level deeper. The START record carries the new level.
    pub fn begin_phase(&mut self, label: &str) {
        self.begin_phase_bytes(label.as_bytes());
    }

    /// Like [`begin_phase`](Self::begin_phase), for labels that are not UTF-8.
    pub fn begin_phase_bytes(&mut self, label: &[u8]) {
        self.level = self.level.saturating_add(1);
        self.emit(MemoryEvent::Start { label }, None);
    }

    /// Closes the current phase. The STOP record carries the level being closed.
    pub fn end_phase(&mut self) {
        self.emit(MemoryEvent::Stop, None);
        self.level = self.level.saturating_sub(1);
    }

    pub fn trace_malloc(&mut self, ptr: *const c_void, size: usize) {
        self.emit(
            MemoryEvent::Malloc {
                ptr: ptr as usize as u32,
                size: size as u32,
            },
            None,
        );
    }

    pub fn trace_calloc(&mut self, ptr: *const c_void, nmemb: usize, size: usize) {
        self.emit(
            MemoryEvent::Calloc {
                ptr: ptr as usize as u32,
                nmemb: nmemb as u32,
                size: size as u32,
            },
            None,
        );
    }

    /// A free of the null pointer is suspicious and carries `frames` along.
    pub fn trace_free(&mut self, ptr: *const c_void, frames: Frames<'_>) {
        let event = MemoryEvent::Free {
            ptr: ptr as usize as u32,
        };
        let trace = event.wants_trace().then_some(frames);
        self.emit(event, trace);
    }

    pub fn trace_realloc(&mut self, new_ptr: *const c_void, old_ptr: *const c_void, size: usize) {
        self.emit(
            MemoryEvent::Realloc {
                new_ptr: new_ptr as usize as u32,
                old_ptr: old_ptr as usize as u32,
                size: size as u32,
            },
            None,
        );
    }

    /// Writes `event` at the current level, unless output is suppressed.
    pub fn emit(&mut self, event: MemoryEvent<'_>, trace: Option<Frames<'_>>) {
        if !self.is_active() {
            return;
        }
        let mut enc = Encoder::new(&mut self.sink);
        event.encode(&mut enc, self.level, trace.map(|f| (f, self.width)));
    }
}

/// The allocator being traced.
///
/// # Safety
///
/// Implementations must behave like the C allocation functions of the same name.
pub unsafe trait RawAllocator {
    unsafe fn malloc(&mut self, size: usize) -> *mut c_void;
    unsafe fn calloc(&mut self, nmemb: usize, size: usize) -> *mut c_void;
    unsafe fn free(&mut self, ptr: *mut c_void);
    unsafe fn realloc(&mut self, ptr: *mut c_void, size: usize) -> *mut c_void;
}

/// Drop-in replacement for an allocator, tracing every call.
pub struct TracedAllocator<A, S> {
    raw: A,
    tracer: MemTracer<S>,
}

impl<A: RawAllocator, S: ByteSink> TracedAllocator<A, S> {
    pub fn new(raw: A, tracer: MemTracer<S>) -> Self {
        Self { raw, tracer }
    }

    pub fn tracer(&self) -> &MemTracer<S> {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut MemTracer<S> {
        &mut self.tracer
    }

    pub fn into_parts(self) -> (A, MemTracer<S>) {
        (self.raw, self.tracer)
    }

    /// # Safety
    ///
    /// Same contract as the underlying allocator.
    pub unsafe fn malloc(&mut self, size: usize) -> *mut c_void {
        let ptr = self.raw.malloc(size);
        self.tracer.trace_malloc(ptr, size);
        ptr
    }

    /// # Safety
    ///
    /// Same contract as the underlying allocator.
    pub unsafe fn calloc(&mut self, nmemb: usize, size: usize) -> *mut c_void {
        let ptr = self.raw.calloc(nmemb, size);
        self.tracer.trace_calloc(ptr, nmemb, size);
        ptr
    }

    /// Traces before freeing, so the record never names a block that is already gone.
    ///
    /// # Safety
    ///
    /// Same contract as the underlying allocator.
    pub unsafe fn free(&mut self, ptr: *mut c_void, frames: Frames<'_>) {
        self.tracer.trace_free(ptr, frames);
        self.raw.free(ptr);
    }

    /// # Safety
    ///
    /// Same contract as the underlying allocator.
    pub unsafe fn realloc(&mut self, ptr: *mut c_void, size: usize) -> *mut c_void {
        let new_ptr = self.raw.realloc(ptr, size);
        self.tracer.trace_realloc(new_ptr, ptr, size);
        new_ptr
    }
}
