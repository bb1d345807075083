//! On-device execution and allocation tracer for microcontroller firmware.
//!
//! Two questions are answered at runtime, without an OS or a debugger:
//! "what is the current call chain?" and "which allocations happened, in which phase?".
//! The call chain is a shadow stack fed by compiler-inserted entry/exit hooks
//! (`-finstrument-functions`), the allocation events are produced by wrapping the allocator.
//! Both are streamed as a compact big-endian binary protocol to an arbitrary byte sink.
//!
//! Nothing in here allocates, so the tracer can safely observe the allocator it wraps.
//! All capacities are fixed at build time through const generics.
//!
//! # Building blocks
//!
//! - [`Monitor`]: shadow call stack, depth breakpoint, non-local-jump repair and freeze/resume.
//! - [`MemTracer`]: allocation event emitter with phase levels.
//! - [`protocol`]: the wire format shared by both.
//! - [`global`]: a process-wide instance for firmware that calls in from C or from hooks.
//!
//! ```
//! use umtrace::{Config, Halt, Monitor};
//!
//! let mut monitor: Monitor<Halt> = Monitor::new(Config::default(), Halt);
//! monitor.on_enter(0x1004, 0x2000);
//! monitor.on_enter(0x2010, 0x3000);
//! assert_eq!(monitor.depth(), 2);
//! assert_eq!(monitor.frame_at(0).map(|f| f.to), Some(0x3000));
//! monitor.on_exit(0x2010, 0x3000);
//! monitor.on_exit(0x1004, 0x2000);
//! assert_eq!(monitor.depth(), 0);
//! ```
//!
//! # Instrumentation contract
//!
//! The tracer's own code, the output callback and the logger backend must be built
//! without instrumentation, else every hook re-enters itself.
//! Tail-call elimination must be disabled for instrumented code, or exits are under-counted.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate log;

pub mod bounded;
pub mod config;
pub mod error;
pub mod fault;
pub mod global;
pub mod jump;
pub mod memtrace;
pub mod monitor;
pub mod platform;
pub mod protocol;
pub mod sink;
pub mod stack;
pub mod symbols;

pub use config::{Config, DEFAULT_JUMP_SLOTS, DEFAULT_STACK_DEPTH, MAX_EXCLUDED};
pub use error::Error;
pub use fault::{Fault, FaultHandler, Halt, ReportAndHalt};
pub use jump::{JumpCheckpoint, JumpTracker};
pub use memtrace::{MemTracer, RawAllocator, TracedAllocator};
pub use monitor::{Monitor, Session, Tracked};
pub use protocol::{AddrWidth, MemoryEvent, Op};
pub use sink::{BufferSink, ByteSink, CallbackSink, Console, FnSink};
pub use stack::{CallFrame, Frames, ShadowStack};
pub use symbols::{NoSymbols, PokedNames, SymbolEntry, SymbolMap, SymbolTable};

/// Code address as seen by the hooks.
pub type Address = usize;
