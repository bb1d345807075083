//! Build-time capacities and runtime configuration.

use crate::error::Error;
use crate::protocol::AddrWidth;
use crate::Address;

/// Default capacity of the shadow stack, in frames.
pub const DEFAULT_STACK_DEPTH: usize = 100;

/// Default capacity of the non-local-jump checkpoint table.
pub const DEFAULT_JUMP_SLOTS: usize = 16;

/// Number of function addresses the hooks can be told to ignore.
pub const MAX_EXCLUDED: usize = 4;

/// Runtime configuration shared by the monitor and the allocation tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Clear bit 0 of every hooked address (ARM Thumb interworking bit).
    pub strip_thumb_bit: bool,
    /// Depth breakpoint armed at construction.
    pub breakpoint: Option<usize>,
    /// Width of the addresses in embedded stack traces.
    pub addr_width: AddrWidth,
    /// Whether allocation events are emitted right after construction.
    pub trace_allocations: bool,
    excluded: [Address; MAX_EXCLUDED],
    nr_excluded: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strip_thumb_bit: false,
            breakpoint: None,
            addr_width: AddrWidth::U16,
            trace_allocations: true,
            excluded: [0; MAX_EXCLUDED],
            nr_excluded: 0,
        }
    }
}

impl Config {
    pub fn with_thumb_bit_stripped(mut self, strip: bool) -> Self {
        self.strip_thumb_bit = strip;
        self
    }

    pub fn with_breakpoint(mut self, depth: usize) -> Self {
        self.breakpoint = Some(depth);
        self
    }

    pub fn with_addr_width(mut self, width: AddrWidth) -> Self {
        self.addr_width = width;
        self
    }

    pub fn with_allocation_tracing(mut self, enabled: bool) -> Self {
        self.trace_allocations = enabled;
        self
    }

    /// Makes the hooks ignore the function at `addr`.
    ///
    /// `setjmp`/`longjmp` are the usual candidates: their frames are repaired through
    /// checkpoints instead.
    pub fn exclude(mut self, addr: Address) -> Result<Self, Error> {
        if self.is_excluded(self.normalize(addr)) {
            return Ok(self);
        }
        if self.nr_excluded == MAX_EXCLUDED {
            return Err(Error::ExclusionListFull);
        }
        self.excluded[self.nr_excluded] = addr;
        self.nr_excluded += 1;
        Ok(self)
    }

    pub fn excluded(&self) -> &[Address] {
        &self.excluded[..self.nr_excluded]
    }

    /// Expects an already normalized address.
    pub fn is_excluded(&self, addr: Address) -> bool {
        self.excluded().iter().any(|&e| self.normalize(e) == addr)
    }

    #[inline]
    pub fn normalize(&self, addr: Address) -> Address {
        if self.strip_thumb_bit {
            addr & !1
        } else {
            addr
        }
    }
}
