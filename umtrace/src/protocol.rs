//! Binary tracing protocol.
//!
//! All multi-byte integers are big-endian. A record is
//!
//! ```text
//! op: u8 | level: u8 | [trace] | payload
//! ```
//!
//! Bit 7 of `level` ([`STACK_TRACE_MASK`]) says a stack trace follows the level byte:
//! `count: u16`, then `count` pairs of `(from, to)`, innermost frame first. The address width
//! of those pairs is fixed per stream ([`AddrWidth`]); the low 7 bits of `level` carry the
//! phase level.
//!
//! | op      | value | payload                                   |
//! |---------|-------|-------------------------------------------|
//! | START   | 0     | `len: u16` + `len` bytes of phase label   |
//! | MALLOC  | 1     | `ptr: u32`, `size: u32`                   |
//! | FREE    | 2     | `ptr: u32`                                |
//! | REALLOC | 3     | `new_ptr: u32`, `old_ptr: u32`, `size: u32` |
//! | CALLOC  | 4     | `ptr: u32`, `nmemb: u32`, `size: u32`     |
//! | STOP    | 5     | none                                      |

use byteorder::{BigEndian, ByteOrder};

use crate::sink::ByteSink;
use crate::stack::Frames;

/// Level-byte flag announcing an embedded stack trace.
pub const STACK_TRACE_MASK: u8 = 0x80;

/// Bits of the level byte carrying the phase level.
pub const LEVEL_MASK: u8 = 0x7f;

/// Record opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Start = 0,
    Malloc = 1,
    Free = 2,
    Realloc = 3,
    Calloc = 4,
    Stop = 5,
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Start,
            1 => Self::Malloc,
            2 => Self::Free,
            3 => Self::Realloc,
            4 => Self::Calloc,
            5 => Self::Stop,
            other => return Err(other),
        })
    }
}

/// Width of the addresses in embedded stack traces.
///
/// `U16` matches 16-bit-addressable trace domains and is what existing host decoders expect
/// by default. Addresses are truncated to the low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrWidth {
    #[default]
    U16,
    U32,
}

/// Big-endian primitive writer.
pub struct Encoder<S> {
    sink: S,
}

impl<S: ByteSink> Encoder<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    pub fn u8(&mut self, v: u8) {
        self.sink.put(v);
    }

    pub fn u16(&mut self, v: u16) {
        let mut buf = [0; 2];
        BigEndian::write_u16(&mut buf, v);
        self.sink.put_all(&buf);
    }

    pub fn u32(&mut self, v: u32) {
        let mut buf = [0; 4];
        BigEndian::write_u32(&mut buf, v);
        self.sink.put_all(&buf);
    }

    /// `u16` length prefix followed by the bytes. Anything past 65535 bytes is cut off.
    pub fn bytes(&mut self, data: &[u8]) {
        let data = &data[..data.len().min(u16::MAX as usize)];
        self.u16(data.len() as u16);
        self.sink.put_all(data);
    }

    pub fn addr(&mut self, addr: usize, width: AddrWidth) {
        match width {
            AddrWidth::U16 => self.u16(addr as u16),
            AddrWidth::U32 => self.u32(addr as u32),
        }
    }

    /// Opcode and level byte, plus the stack trace when `trace` is given.
    pub fn header(&mut self, op: Op, level: u8, trace: Option<(Frames<'_>, AddrWidth)>) {
        self.u8(op as u8);
        match trace {
            Some((frames, width)) => {
                self.u8((level & LEVEL_MASK) | STACK_TRACE_MASK);
                let count = frames.len().min(u16::MAX as usize);
                self.u16(count as u16);
                for frame in frames.iter().take(count) {
                    self.addr(frame.from, width);
                    self.addr(frame.to, width);
                }
            }
            None => self.u8(level & LEVEL_MASK),
        }
    }
}

/// One allocation-tracer event. Built on the fly and serialized right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEvent<'a> {
    Start { label: &'a [u8] },
    Malloc { ptr: u32, size: u32 },
    Free { ptr: u32 },
    Realloc { new_ptr: u32, old_ptr: u32, size: u32 },
    Calloc { ptr: u32, nmemb: u32, size: u32 },
    Stop,
}

impl MemoryEvent<'_> {
    pub fn op(&self) -> Op {
        match self {
            Self::Start { .. } => Op::Start,
            Self::Malloc { .. } => Op::Malloc,
            Self::Free { .. } => Op::Free,
            Self::Realloc { .. } => Op::Realloc,
            Self::Calloc { .. } => Op::Calloc,
            Self::Stop => Op::Stop,
        }
    }

    /// Only a free of the null pointer carries its call stack.
    pub fn wants_trace(&self) -> bool {
        matches!(self, Self::Free { ptr: 0 })
    }

    /// Writes the full record.
    pub fn encode<S: ByteSink>(
        &self,
        enc: &mut Encoder<S>,
        level: u8,
        trace: Option<(Frames<'_>, AddrWidth)>,
    ) {
        enc.header(self.op(), level, trace);
        match *self {
            Self::Start { label } => enc.bytes(label),
            Self::Malloc { ptr, size } => {
                enc.u32(ptr);
                enc.u32(size);
            }
            Self::Free { ptr } => enc.u32(ptr),
            Self::Realloc {
                new_ptr,
                old_ptr,
                size,
            } => {
                enc.u32(new_ptr);
                enc.u32(old_ptr);
                enc.u32(size);
            }
            Self::Calloc { ptr, nmemb, size } => {
                enc.u32(ptr);
                enc.u32(nmemb);
                enc.u32(size);
            }
            Self::Stop => {}
        }
    }
}
