//! Shadow call-stack engine and trace session control.
//!
//! The monitor is fed by two hooks that something outside this crate calls around every
//! instrumented function: [`Monitor::on_enter`] and [`Monitor::on_exit`]. With GCC that is
//! `-finstrument-functions`, see the `umtrace-ffi` crate.
//!
//! # Accounting
//!
//! The monitor counts *active calls* and records up to `N` of them as [`CallFrame`]s.
//! Calls it could not record are *untracked*: those pushed beyond capacity and those entered
//! while the stack was frozen. Untracked calls always sit above the recorded ones, so exits
//! consume them first and only then pop recorded frames. `depth()` never exceeds `N`.
//!
//! # Freezing
//!
//! Between [`Monitor::freeze`] and [`Monitor::resume`] the recorded frames are never
//! touched, so they can be read out from a fault handler or a dump routine. Hooks firing in
//! that window only move the active-call count. On resume the recorded frames are cut down
//! to the lowest depth reached while frozen.

use core::fmt;

use crate::config::{Config, DEFAULT_JUMP_SLOTS, DEFAULT_STACK_DEPTH};
use crate::error::Error;
use crate::fault::{Fault, FaultHandler};
use crate::jump::{JumpCheckpoint, JumpTracker};
use crate::stack::{CallFrame, Frames, ShadowStack};
use crate::symbols::SymbolTable;
use crate::Address;

/// What an entry hook did with its call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    /// Frame recorded on the shadow stack.
    Recorded,
    /// Call counted but not recorded (stack full or frozen).
    Untracked,
    /// Function is excluded from tracing.
    Skipped,
}

/// Inspection state of the shadow stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Idle,
    /// Recorded frames are read-only. `floor` is the lowest active-call count seen since.
    Frozen { floor: usize },
}

#[derive(Debug, Clone, Copy, Default)]
struct Breakpoint {
    threshold: Option<usize>,
    tripped: bool,
}

impl Breakpoint {
    /// True on the first push reaching the threshold since it was armed.
    fn crossed(&mut self, depth: usize) -> bool {
        match self.threshold {
            Some(t) if depth >= t => !core::mem::replace(&mut self.tripped, true),
            _ => false,
        }
    }

    /// Arms again once `depth` is back below the threshold. Never trips.
    fn rearm(&mut self, depth: usize) {
        if self.threshold.is_some_and(|t| depth < t) {
            self.tripped = false;
        }
    }
}

/// Shadow call stack with depth breakpoint, jump repair and freeze/resume.
///
/// `N` is the shadow-stack capacity, `M` the number of jump checkpoints.
pub struct Monitor<H, const N: usize = DEFAULT_STACK_DEPTH, const M: usize = DEFAULT_JUMP_SLOTS> {
    config: Config,
    stack: ShadowStack<N>,
    active: usize,
    jumps: JumpTracker<M>,
    breakpoint: Breakpoint,
    session: Session,
    last_status: Option<i32>,
    overflows: usize,
    handler: H,
}

impl<H: FaultHandler, const N: usize, const M: usize> Monitor<H, N, M> {
    pub fn new(config: Config, handler: H) -> Self {
        Self {
            config,
            stack: ShadowStack::new(),
            active: 0,
            jumps: JumpTracker::new(),
            breakpoint: Breakpoint {
                threshold: config.breakpoint,
                tripped: false,
            },
            session: Session::Idle,
            last_status: None,
            overflows: 0,
            handler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Makes the hooks ignore the function at `addr` from now on.
    pub fn exclude(&mut self, addr: Address) -> Result<(), Error> {
        self.config = self.config.exclude(addr)?;
        Ok(())
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Entry hook: `target` was just called from `call_site`.
    pub fn on_enter(&mut self, call_site: Address, target: Address) -> Tracked {
        let frame = self.frame(call_site, target);
        if self.config.is_excluded(frame.to) {
            return Tracked::Skipped;
        }

        let tracked = if self.session != Session::Idle || self.untracked() > 0 {
            Tracked::Untracked
        } else {
            match self.stack.push(frame) {
                Ok(()) => Tracked::Recorded,
                Err(_) => {
                    if self.overflows == 0 {
                        warn!("shadow stack full ({} frames), deeper calls are not recorded", N);
                    }
                    self.overflows += 1;
                    Tracked::Untracked
                }
            }
        };
        self.active += 1;

        if self.breakpoint.crossed(self.active) {
            let fault = Fault::DepthBreakpoint { depth: self.active };
            self.handler.on_fault(&fault, self.stack.frames());
        }
        tracked
    }

    /// Exit hook: `target`, called from `call_site`, is returning.
    ///
    /// An exit without any active call is ignored.
    pub fn on_exit(&mut self, call_site: Address, target: Address) {
        let frame = self.frame(call_site, target);
        if self.config.is_excluded(frame.to) || self.active == 0 {
            return;
        }

        match &mut self.session {
            Session::Frozen { floor } => {
                self.active -= 1;
                *floor = (*floor).min(self.active);
            }
            Session::Idle => {
                if self.active == self.stack.depth() {
                    if let Some(&top) = self.stack.top() {
                        if top != frame {
                            error!("exit of {:#x} does not match recorded {:#x}", frame.to, top.to);
                            let fault = Fault::FrameMismatch {
                                expected: top,
                                actual: frame,
                            };
                            self.handler.on_fault(&fault, self.stack.frames());
                        }
                    }
                    self.stack.pop();
                }
                self.active -= 1;
            }
        }
        self.breakpoint.rearm(self.active);
    }

    fn frame(&self, call_site: Address, target: Address) -> CallFrame {
        CallFrame::new(self.config.normalize(call_site), self.config.normalize(target))
    }

    /// Number of recorded frames.
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Number of calls that have been entered and not yet returned from.
    pub fn active_calls(&self) -> usize {
        self.active
    }

    /// Active calls without a recorded frame.
    ///
    /// While frozen, calls returning below the recorded depth do not count.
    pub fn untracked(&self) -> usize {
        self.active.saturating_sub(self.stack.depth())
    }

    /// Number of pushes refused because the shadow stack was full.
    pub fn overflows(&self) -> usize {
        self.overflows
    }

    /// Recorded frame `index` levels below the top; 0 is the innermost call.
    pub fn frame_at(&self, index: usize) -> Option<CallFrame> {
        self.stack.frames().get(index)
    }

    pub fn frames(&self) -> Frames<'_> {
        self.stack.frames()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Raises [`Fault::DepthBreakpoint`] when the active-call count reaches `depth`.
    pub fn set_breakpoint(&mut self, depth: usize) {
        self.breakpoint = Breakpoint {
            threshold: Some(depth),
            tripped: false,
        };
    }

    pub fn clear_breakpoint(&mut self) {
        self.breakpoint = Breakpoint::default();
    }

    pub fn breakpoint(&self) -> Option<usize> {
        self.breakpoint.threshold
    }

    /// Remembers the current depth for the jump buffer `id` (on `setjmp`).
    ///
    /// Returns the checkpoint evicted from a full table.
    pub fn checkpoint(&mut self, id: usize) -> Option<JumpCheckpoint> {
        self.jumps.checkpoint(id, self.active)
    }

    /// Restores the depth saved for `id` once a jump to it has landed (after `longjmp`).
    ///
    /// The skipped frames are dropped in one step. An unknown `id` raises
    /// [`Fault::UnknownCheckpoint`] and leaves the stack alone.
    pub fn unwind_to(&mut self, id: usize) -> Result<usize, Error> {
        let Some(depth) = self.jumps.depth_of(id) else {
            warn!("jump to unknown buffer {:#x}, depth left at {}", id, self.active);
            self.handler
                .on_fault(&Fault::UnknownCheckpoint { id }, self.stack.frames());
            return Err(Error::UnknownCheckpoint(id));
        };

        self.active = depth;
        match &mut self.session {
            Session::Frozen { floor } => *floor = (*floor).min(depth),
            Session::Idle => self.stack.truncate(depth),
        }
        self.breakpoint.rearm(self.active);
        Ok(depth)
    }

    pub fn jumps(&self) -> &JumpTracker<M> {
        &self.jumps
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.session, Session::Frozen { .. })
    }

    /// Makes the recorded frames read-only and returns their count.
    ///
    /// Freezing twice is refused with [`Error::AlreadyFrozen`]; the first freeze stays in effect.
    pub fn freeze(&mut self) -> Result<usize, Error> {
        if self.is_frozen() {
            return Err(Error::AlreadyFrozen);
        }
        self.session = Session::Frozen { floor: self.active };
        Ok(self.stack.depth())
    }

    /// Ends the read-only window. `status` is kept for diagnostics only.
    pub fn resume(&mut self, status: i32) -> Result<(), Error> {
        let Session::Frozen { floor } = self.session else {
            return Err(Error::NotFrozen);
        };
        self.stack.truncate(floor);
        self.session = Session::Idle;
        self.last_status = Some(status);
        Ok(())
    }

    /// Status passed to the last [`resume`](Self::resume).
    pub fn last_status(&self) -> Option<i32> {
        self.last_status
    }

    /// Writes the symbolized recorded stack, innermost first.
    pub fn print_stack_trace<W, S>(&self, out: &mut W, symbols: &S) -> fmt::Result
    where
        W: fmt::Write + ?Sized,
        S: SymbolTable + ?Sized,
    {
        self.stack.frames().write_trace(out, symbols)
    }

    /// Forgets all frames, checkpoints and overflow counts. The session is left as is.
    pub fn reset(&mut self) {
        self.stack.truncate(0);
        self.active = 0;
        self.overflows = 0;
        self.jumps.clear();
        self.breakpoint.rearm(0);
        if let Session::Frozen { floor } = &mut self.session {
            *floor = 0;
        }
    }
}
