//! Output sink abstraction.
//!
//! Every byte the tracer produces goes through a [`ByteSink`]. Firmware usually installs a
//! single process-wide output callback (a UART putc) with [`install_output`], which
//! [`CallbackSink`] then forwards to.

use core::fmt;

use spin::Once;

use crate::error::Error;

/// Byte consumer callback, e.g. a UART transmit function.
pub type OutputFn = fn(u8);

/// Byte producer callback for interactive consumers. Returns a negative value when no
/// byte is available.
pub type InputFn = fn() -> i32;

static OUTPUT: Once<OutputFn> = Once::new();
static INPUT: Once<InputFn> = Once::new();

/// Consumer of the tracer's output bytes.
pub trait ByteSink {
    fn put(&mut self, byte: u8);

    fn put_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put(b);
        }
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn put(&mut self, byte: u8) {
        (**self).put(byte)
    }

    fn put_all(&mut self, bytes: &[u8]) {
        (**self).put_all(bytes)
    }
}

/// Sink calling a plain function for each byte.
#[derive(Clone, Copy)]
pub struct FnSink(pub OutputFn);

impl ByteSink for FnSink {
    fn put(&mut self, byte: u8) {
        (self.0)(byte)
    }
}

/// Sink forwarding to the process-wide output callback. Drops bytes while none is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackSink;

impl ByteSink for CallbackSink {
    fn put(&mut self, byte: u8) {
        putc(byte)
    }
}

/// In-memory sink with a fixed capacity.
///
/// Bytes that do not fit are counted, not stored.
pub struct BufferSink<const N: usize> {
    buf: [u8; N],
    len: usize,
    dropped: usize,
}

impl<const N: usize> BufferSink<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            dropped: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Number of bytes lost because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.dropped = 0;
    }
}

impl<const N: usize> Default for BufferSink<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteSink for BufferSink<N> {
    fn put(&mut self, byte: u8) {
        if self.len < N {
            self.buf[self.len] = byte;
            self.len += 1;
        } else {
            self.dropped += 1;
        }
    }
}

/// Text writer over a sink, for human-readable reports.
///
/// `\n` goes out as `\r\n`, as serial terminals expect.
pub struct Console<S>(pub S);

impl<S: ByteSink> fmt::Write for Console<S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if b == b'\n' {
                self.0.put(b'\r');
            }
            self.0.put(b);
        }
        Ok(())
    }
}

/// Installs the process-wide output callback. Can only be done once.
pub fn install_output(f: OutputFn) -> Result<(), Error> {
    install(&OUTPUT, f)
}

/// Installs the process-wide input callback. Can only be done once.
pub fn install_input(f: InputFn) -> Result<(), Error> {
    install(&INPUT, f)
}

fn install<T: Copy>(slot: &Once<T>, f: T) -> Result<(), Error> {
    let mut fresh = false;
    slot.call_once(|| {
        fresh = true;
        f
    });
    if fresh {
        Ok(())
    } else {
        Err(Error::AlreadyInstalled)
    }
}

pub fn has_output() -> bool {
    OUTPUT.is_completed()
}

/// Sends one byte to the installed output callback, if any.
#[inline]
pub fn putc(byte: u8) {
    if let Some(out) = OUTPUT.get() {
        out(byte)
    }
}

/// Reads one byte from the installed input callback. -1 when none is installed.
pub fn getc() -> i32 {
    INPUT.get().map_or(-1, |input| input())
}
