//! Shadow call stack storage.

use core::fmt;
use core::iter::Rev;
use core::slice;

use crate::bounded::BoundedStack;
use crate::symbols::SymbolTable;
use crate::Address;

const UNKNOWN: &str = "<UNKNOWN>";

/// One active call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallFrame {
    /// Call site in the caller.
    pub from: Address,
    /// Entry address of the called function.
    pub to: Address,
}

impl CallFrame {
    pub const fn new(from: Address, to: Address) -> Self {
        Self { from, to }
    }
}

/// Recorded frames, at most `N` of them.
pub struct ShadowStack<const N: usize> {
    frames: BoundedStack<CallFrame, N>,
}

impl<const N: usize> ShadowStack<N> {
    pub fn new() -> Self {
        Self {
            frames: BoundedStack::new(),
        }
    }

    /// Refuses the frame once `N` frames are recorded.
    pub fn push(&mut self, frame: CallFrame) -> Result<(), CallFrame> {
        self.frames.push(frame)
    }

    pub fn pop(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.top()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn frames(&self) -> Frames<'_> {
        Frames::new(self.frames.as_slice())
    }
}

impl<const N: usize> Default for ShadowStack<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of recorded frames. Index 0 is the innermost (most recent) frame.
#[derive(Debug, Clone, Copy)]
pub struct Frames<'a> {
    // oldest first
    frames: &'a [CallFrame],
}

impl<'a> Frames<'a> {
    /// `frames` ordered oldest (outermost) first, the way they were pushed.
    pub const fn new(frames: &'a [CallFrame]) -> Self {
        Self { frames }
    }

    pub const fn empty() -> Self {
        Self { frames: &[] }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame `index` levels below the top.
    pub fn get(&self, index: usize) -> Option<CallFrame> {
        let len = self.frames.len();
        if index >= len {
            return None;
        }
        Some(self.frames[len - 1 - index])
    }

    /// Innermost to outermost.
    pub fn iter(&self) -> Rev<slice::Iter<'a, CallFrame>> {
        self.frames.iter().rev()
    }

    /// Writes one line per frame, innermost first:
    /// `name (to) <- caller+offset (from)`.
    pub fn write_trace<W, S>(&self, out: &mut W, symbols: &S) -> fmt::Result
    where
        W: fmt::Write + ?Sized,
        S: SymbolTable + ?Sized,
    {
        for (i, frame) in self.iter().enumerate() {
            let name = symbols.resolve(frame.to).unwrap_or(UNKNOWN);
            // the caller is the function entered by the next outer frame
            let (caller, caller_start) = match self.get(i + 1) {
                Some(outer) => (symbols.resolve(outer.to).unwrap_or(UNKNOWN), outer.to),
                None => (UNKNOWN, frame.from),
            };
            writeln!(
                out,
                "{} ({:8X}) <- {}+{:X} ({:8X})",
                name,
                frame.to,
                caller,
                frame.from.wrapping_sub(caller_start),
                frame.from
            )?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for Frames<'a> {
    type Item = &'a CallFrame;
    type IntoIter = Rev<slice::Iter<'a, CallFrame>>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter().rev()
    }
}
