//! Anomalies detected inside the hooks, and what to do about them.
//!
//! Hooks cannot return errors to the instrumented code, so they hand a [`Fault`] to a
//! [`FaultHandler`] before returning. The handler decides whether to report, halt or carry on.

use core::fmt;

use crate::stack::{CallFrame, Frames};
use crate::symbols::SymbolTable;

/// Something the hooks could not reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call depth reached the configured breakpoint.
    DepthBreakpoint { depth: usize },
    /// An exit hook does not match the innermost recorded frame.
    FrameMismatch {
        expected: CallFrame,
        actual: CallFrame,
    },
    /// A jump landed on a buffer no checkpoint was recorded for. Depth is left as is.
    UnknownCheckpoint { id: usize },
}

impl Fault {
    /// Fatal faults mean the hardware stack or the shadow stack can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::DepthBreakpoint { .. } | Self::FrameMismatch { .. } => true,
            Self::UnknownCheckpoint { .. } => false,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthBreakpoint { depth } => {
                write!(f, "Breakpoint on call stack depth limit ({})", depth)
            }
            Self::FrameMismatch { expected, actual } => write!(
                f,
                "Frame mismatch: stack has {:X} <- {:X}, exit hook got {:X} <- {:X}",
                expected.to, expected.from, actual.to, actual.from
            ),
            Self::UnknownCheckpoint { id } => {
                write!(f, "No checkpoint for jump buffer {:#x}", id)
            }
        }
    }
}

/// Receives faults raised by the hooks.
///
/// Runs synchronously inside a hook: it must not call instrumented code.
pub trait FaultHandler {
    /// `frames` is the recorded stack at the time of the fault, innermost first.
    fn on_fault(&mut self, fault: &Fault, frames: Frames<'_>);
}

impl<H: FaultHandler + ?Sized> FaultHandler for &mut H {
    fn on_fault(&mut self, fault: &Fault, frames: Frames<'_>) {
        (**self).on_fault(fault, frames)
    }
}

/// Stops the core on fatal faults, ignores the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Halt;

impl FaultHandler for Halt {
    fn on_fault(&mut self, fault: &Fault, _frames: Frames<'_>) {
        if fault.is_fatal() {
            error!("{}", fault);
            halt();
        }
        warn!("{}", fault);
    }
}

/// Prints a report and the symbolized stack trace, then halts on fatal faults.
pub struct ReportAndHalt<W, S> {
    out: W,
    symbols: S,
}

impl<W: fmt::Write, S: SymbolTable> ReportAndHalt<W, S> {
    pub fn new(out: W, symbols: S) -> Self {
        Self { out, symbols }
    }

    pub fn symbols_mut(&mut self) -> &mut S {
        &mut self.symbols
    }
}

impl<W: fmt::Write, S: SymbolTable> FaultHandler for ReportAndHalt<W, S> {
    fn on_fault(&mut self, fault: &Fault, frames: Frames<'_>) {
        // nowhere left to report a failing writer to
        let _ = report(&mut self.out, &self.symbols, fault, frames);
        if fault.is_fatal() {
            halt();
        }
    }
}

/// Writes `[UMON] <fault>` and, for fatal faults, the stack trace.
pub fn report<W, S>(out: &mut W, symbols: &S, fault: &Fault, frames: Frames<'_>) -> fmt::Result
where
    W: fmt::Write + ?Sized,
    S: SymbolTable + ?Sized,
{
    writeln!(out, "[UMON] {}", fault)?;
    if fault.is_fatal() {
        frames.write_trace(out, symbols)?;
    }
    Ok(())
}

/// Parks the core forever.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
