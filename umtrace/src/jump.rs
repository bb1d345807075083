//! Non-local jump bookkeeping.
//!
//! A `longjmp` skips the exit hooks of every frame it unwinds. The depth of the shadow stack
//! is therefore saved when the jump buffer is set up and restored when the jump lands.

use crate::bounded::Ring;

/// Saved shadow-stack depth for one jump buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JumpCheckpoint {
    /// Identity of the jump buffer, usually its address.
    pub id: usize,
    /// Number of active calls when the checkpoint was set.
    pub depth: usize,
}

/// Fixed table of checkpoints, evicting the oldest one when full.
///
/// Lookups do not consume entries: the same buffer can be jumped to any number of times.
pub struct JumpTracker<const M: usize> {
    checkpoints: Ring<JumpCheckpoint, M>,
}

impl<const M: usize> JumpTracker<M> {
    pub fn new() -> Self {
        Self {
            checkpoints: Ring::new(),
        }
    }

    /// Records `depth` for `id`. Setting up the same buffer again updates its entry in place.
    ///
    /// Returns the checkpoint evicted to make room, if any.
    pub fn checkpoint(&mut self, id: usize, depth: usize) -> Option<JumpCheckpoint> {
        if let Some(cp) = self.checkpoints.find_mut(|cp| cp.id == id) {
            cp.depth = depth;
            return None;
        }
        let evicted = self.checkpoints.push(JumpCheckpoint { id, depth });
        if let Some(old) = evicted {
            debug!("checkpoint table full, evicted {:#x} (depth {})", old.id, old.depth);
        }
        evicted
    }

    /// Depth recorded for `id`.
    pub fn depth_of(&self, id: usize) -> Option<usize> {
        self.checkpoints
            .iter()
            .find(|cp| cp.id == id)
            .map(|cp| cp.depth)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        M
    }

    pub fn clear(&mut self) {
        self.checkpoints.clear();
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &JumpCheckpoint> + '_ {
        self.checkpoints.iter()
    }
}

impl<const M: usize> Default for JumpTracker<M> {
    fn default() -> Self {
        Self::new()
    }
}
