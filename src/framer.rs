//! Line framing and paced reads over the serial endpoint.

use core::fmt;
use core::time::Duration;

use embedded_hal::timer::CountDown;
use heapless::String;
use nb::block;

use crate::SerialPort;

/// Longest command line the server keeps; extra bytes are dropped.
pub const LINE_MAX: usize = 64;

/// Deadline for the rest of a line (or number) once its first byte has
/// arrived.
pub const LINE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Outcome of a bounded wait for buffered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The requested number of bytes is buffered.
    Ready,
    /// The deadline passed first.
    TimedOut,
}

/// Line-oriented framing over a [`SerialPort`], with deadlines kept on a
/// countdown timer.
///
/// All reads are spin-polls: the serial endpoint is the only asynchronous
/// source in the system and nothing else needs the CPU meanwhile.
#[derive(Debug)]
pub struct Framer<S, T>
where
    S: SerialPort,
    T: CountDown,
    T::Time: From<Duration>,
{
    serial: S,
    timer: T,
}

impl<S, T> Framer<S, T>
where
    S: SerialPort,
    T: CountDown,
    T::Time: From<Duration>,
{
    pub fn new(serial: S, timer: T) -> Self {
        Framer { serial, timer }
    }

    /// Number of received bytes waiting in the endpoint's buffer.
    pub fn available(&self) -> usize {
        self.serial.available()
    }

    /// Reads one line into `buf`, without the terminator.
    ///
    /// Blocks for the first byte, then gives the rest of the line
    /// [`LINE_TIMEOUT`] to arrive; a stalled line is returned as-is, the
    /// way firmware runtimes time out their line reads.
    pub fn read_line(&mut self, buf: &mut String<LINE_MAX>) -> Result<(), S::Error> {
        buf.clear();
        let first = block!(self.serial.read())?;
        if first == b'\n' {
            return Ok(());
        }
        let _ = buf.push(first as char);
        self.timer.start(LINE_TIMEOUT);
        loop {
            match self.serial.read() {
                Ok(b'\n') => return Ok(()),
                Ok(byte) => {
                    let _ = buf.push(byte as char);
                }
                Err(nb::Error::WouldBlock) => {
                    if self.timer.wait().is_ok() {
                        return Ok(());
                    }
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    /// Busy-waits for input, then parses a decimal integer.
    ///
    /// Skips ahead to the first digit (the terminator of the previous line
    /// is usually still buffered), accumulates digits, and leaves the byte
    /// that ends the number in the buffer. Yields 0 when no digit shows up
    /// within [`LINE_TIMEOUT`].
    pub fn parse_uint(&mut self) -> Result<u32, S::Error> {
        while self.serial.available() == 0 {}

        self.timer.start(LINE_TIMEOUT);
        loop {
            match self.serial.peek() {
                Ok(byte) if byte.is_ascii_digit() => break,
                Ok(_) => {
                    block!(self.serial.read())?;
                }
                Err(nb::Error::WouldBlock) => {
                    if self.timer.wait().is_ok() {
                        return Ok(0);
                    }
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }

        let mut value: u32 = 0;
        self.timer.start(LINE_TIMEOUT);
        loop {
            match self.serial.peek() {
                Ok(byte) if byte.is_ascii_digit() => {
                    block!(self.serial.read())?;
                    value = value
                        .saturating_mul(10)
                        .saturating_add(u32::from(byte - b'0'));
                    self.timer.start(LINE_TIMEOUT);
                }
                Ok(_) => break,
                Err(nb::Error::WouldBlock) => {
                    if self.timer.wait().is_ok() {
                        break;
                    }
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        Ok(value)
    }

    /// Waits until `count` bytes are buffered or `limit` passes.
    pub fn wait_for(&mut self, count: usize, limit: Duration) -> Wait {
        if self.serial.available() >= count {
            return Wait::Ready;
        }
        self.timer.start(limit);
        loop {
            if self.serial.available() >= count {
                return Wait::Ready;
            }
            if self.timer.wait().is_ok() {
                return Wait::TimedOut;
            }
        }
    }

    /// Blocking single-byte read.
    pub fn read_u8(&mut self) -> Result<u8, S::Error> {
        block!(self.serial.read())
    }

    /// Drains already-buffered bytes into `buf`, returning how many
    /// arrived.
    ///
    /// Callers check availability first; a count short of `buf.len()`
    /// means the endpoint went dry mid-read, which upstream treats as a
    /// protocol fault.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize, S::Error> {
        for (count, slot) in buf.iter_mut().enumerate() {
            match self.serial.read() {
                Ok(byte) => *slot = byte,
                Err(nb::Error::WouldBlock) => return Ok(count),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        Ok(buf.len())
    }

    /// Writes `line` followed by a newline.
    pub fn emit(&mut self, line: &str) -> Result<(), S::Error> {
        self.write_all(line.as_bytes())?;
        self.write_all(b"\n")
    }

    /// Writes formatted output followed by a newline.
    pub fn emit_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), S::Error> {
        let mut sink = Sink {
            serial: &mut self.serial,
            error: None,
        };
        if fmt::write(&mut sink, args).is_err() {
            if let Some(e) = sink.error {
                return Err(e);
            }
        }
        self.write_all(b"\n")
    }

    /// Readiness token for the next bulk chunk.
    pub fn emit_ack(&mut self) -> Result<(), S::Error> {
        self.emit("ACK")
    }

    /// Terminator for a multi-line response.
    pub fn emit_end(&mut self) -> Result<(), S::Error> {
        self.emit("---END---")
    }

    /// Releases the endpoint and timer.
    pub fn free(self) -> (S, T) {
        (self.serial, self.timer)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), S::Error> {
        for &byte in bytes {
            block!(self.serial.write(byte))?;
        }
        Ok(())
    }
}

/// `fmt::Write` adapter over the serial endpoint that stashes the first
/// real write error, since `fmt::Error` cannot carry it.
struct Sink<'a, S: SerialPort> {
    serial: &'a mut S,
    error: Option<S::Error>,
}

impl<S: SerialPort> fmt::Write for Sink<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if let Err(e) = block!(self.serial.write(byte)) {
                self.error = Some(e);
                return Err(fmt::Error);
            }
        }
        Ok(())
    }
}
