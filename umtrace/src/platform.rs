//! Platform abstraction for interrupt masking.
//!
//! The hooks of the process-wide instance may fire inside interrupt handlers. With the
//! `interrupt-safe` feature they run with interrupts masked, so a handler cannot observe a
//! half-updated shadow stack.

use core::marker::PhantomData;

/// Interrupt masking operations.
pub trait Interrupts {
    /// Masks interrupts, returning whether they were enabled before.
    fn disable() -> bool;

    /// Unmasks interrupts if `was_enabled`.
    fn restore(was_enabled: bool);
}

/// For hosted targets and tests: nothing to mask.
pub struct NoInterrupts;

impl Interrupts for NoInterrupts {
    fn disable() -> bool {
        false
    }

    fn restore(_was_enabled: bool) {}
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        /// ARMv6-M/ARMv7-M: mask through PRIMASK.
        pub struct CortexM;

        impl Interrupts for CortexM {
            #[inline(always)]
            fn disable() -> bool {
                let primask: u32;
                // SAFETY: reads PRIMASK and sets it. Acts as a compiler barrier.
                unsafe {
                    core::arch::asm!(
                        "mrs {}, PRIMASK",
                        "cpsid i",
                        out(reg) primask,
                        options(nostack, preserves_flags),
                    );
                }
                primask & 1 == 0
            }

            #[inline(always)]
            fn restore(was_enabled: bool) {
                if was_enabled {
                    // SAFETY: only re-enables what `disable` turned off
                    unsafe {
                        core::arch::asm!("cpsie i", options(nostack, preserves_flags));
                    }
                }
            }
        }

        /// Interrupt control of the current target.
        pub type Platform = CortexM;
    } else {
        /// Interrupt control of the current target.
        pub type Platform = NoInterrupts;
    }
}

/// Masks interrupts for its lifetime.
pub struct IrqGuard<P: Interrupts = Platform> {
    was_enabled: bool,
    _platform: PhantomData<P>,
}

impl<P: Interrupts> IrqGuard<P> {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            was_enabled: P::disable(),
            _platform: PhantomData,
        }
    }
}

impl<P: Interrupts> Default for IrqGuard<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Interrupts> Drop for IrqGuard<P> {
    #[inline(always)]
    fn drop(&mut self) {
        P::restore(self.was_enabled);
    }
}
