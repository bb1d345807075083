//! Address to function-name lookup.
//!
//! The table itself is supplied from outside (link-time table, module loader, names embedded
//! by the compiler). A miss is never an error: it is printed as `<UNKNOWN>` with the raw address.

use core::ffi::{c_char, CStr};

use crate::Address;

/// Symbol lookup collaborator.
pub trait SymbolTable {
    /// Name of the function containing `addr`, if known.
    fn resolve(&self, addr: Address) -> Option<&str>;
}

impl<T: SymbolTable + ?Sized> SymbolTable for &T {
    fn resolve(&self, addr: Address) -> Option<&str> {
        (**self).resolve(addr)
    }
}

/// Table that knows no symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolTable for NoSymbols {
    fn resolve(&self, _addr: Address) -> Option<&str> {
        None
    }
}

/// One function of a [`SymbolMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry<'a> {
    pub start: Address,
    pub size: usize,
    pub name: &'a str,
}

impl SymbolEntry<'_> {
    fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr - self.start < self.size
    }
}

/// Function table sorted by start address, as produced by `nm -n -S`.
#[derive(Debug, Clone, Copy)]
pub struct SymbolMap<'a> {
    entries: &'a [SymbolEntry<'a>],
}

impl<'a> SymbolMap<'a> {
    /// `entries` must be sorted by `start` and must not overlap.
    pub const fn new(entries: &'a [SymbolEntry<'a>]) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry containing `addr`.
    pub fn lookup(&self, addr: Address) -> Option<&SymbolEntry<'a>> {
        // last entry starting at or before addr
        let idx = self.entries.partition_point(|e| e.start <= addr);
        let entry = self.entries.get(idx.checked_sub(1)?)?;
        entry.contains(addr).then_some(entry)
    }
}

impl SymbolTable for SymbolMap<'_> {
    fn resolve(&self, addr: Address) -> Option<&str> {
        self.lookup(addr).map(|e| e.name)
    }
}

/// Names stored in the text section by GCC's ARM `-mpoke-function-name`.
///
/// The compiler places the NUL-terminated name, padded to a word boundary, right before
/// the function, followed by the marker word `0xff000000 + padded_len`:
///
/// ```text
/// t0:  .ascii "fname", 0
///      .align
/// t1:  .word 0xff000000 + (t1 - t0)
/// fname:
///      mov ip, sp
/// ```
#[derive(Debug)]
pub struct PokedNames {
    _private: (),
}

impl PokedNames {
    /// # Safety
    ///
    /// Every address later passed to [`SymbolTable::resolve`] must point into readable
    /// code, with at least one readable word before it, compiled with `-mpoke-function-name`.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl SymbolTable for PokedNames {
    fn resolve(&self, addr: Address) -> Option<&str> {
        let marker_at = (addr & !1).checked_sub(4)?;
        // SAFETY: guaranteed readable by the contract of `PokedNames::new`
        let marker = unsafe { core::ptr::read_volatile(marker_at as *const u32) };
        if marker >> 24 != 0xff {
            return None;
        }
        let name_at = marker_at.checked_sub((marker & 0xff) as usize)?;
        // SAFETY: the marker says a NUL-terminated name precedes it
        let name = unsafe { CStr::from_ptr(name_at as *const c_char) };
        // the padded name must end exactly at the marker
        if (name_at + name.to_bytes().len() + 4) & !3 != marker_at {
            return None;
        }
        name.to_str().ok()
    }
}

/// Looks `addr` up in `symbols`.
pub fn resolve<S: SymbolTable + ?Sized>(symbols: &S, addr: Address) -> Option<&str> {
    symbols.resolve(addr)
}
