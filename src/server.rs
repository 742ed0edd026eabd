//! The serial command server: one command at a time, half duplex.

use core::convert::Infallible;
use core::time::Duration;

use embedded_hal::timer::CountDown;
use heapless::String;

use crate::framer::{Framer, Wait, LINE_MAX};
use crate::image::{ImageOps, Row, ROW_LEN};
use crate::utils::HexSlice;
use crate::{Error, Memory, SerialPort};

/// Bytes per bulk-write chunk. Bounded by the runtime's serial receive
/// buffer: 48 is known to fit, 64 overruns.
pub const CHUNK_SIZE: usize = 48;

/// Deadline for one chunk to arrive in full.
pub const READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Serial command server for a parallel EEPROM programmer.
///
/// Reads one line-oriented command at a time from the serial endpoint and
/// drives the memory device below it; commands never overlap and every
/// wait is a spin-poll. Keywords are matched case-insensitively.
///
/// # Type Parameters
///
/// * **`M`**: the memory device being programmed, usually an
///   [`EepromBus`](crate::bus::EepromBus).
/// * **`S`**: the runtime's serial endpoint.
/// * **`T`**: countdown timer for the line and chunk deadlines.
#[derive(Debug)]
pub struct Server<M, S, T>
where
    M: Memory,
    S: SerialPort,
    T: CountDown,
    T::Time: From<Duration>,
{
    mem: M,
    framer: Framer<S, T>,
}

impl<M, S, T> Server<M, S, T>
where
    M: Memory,
    S: SerialPort,
    T: CountDown,
    T::Time: From<Duration>,
{
    pub fn new(mem: M, serial: S, timer: T) -> Self {
        Server {
            mem,
            framer: Framer::new(serial, timer),
        }
    }

    /// Emits the ready banner.
    pub fn announce(&mut self) -> Result<(), Error<M::Error, S::Error>> {
        info!("eeprom command server ready");
        self.framer
            .emit("EEPROM Programmer Ready")
            .map_err(Error::Serial)
    }

    /// Announces, then serves commands forever.
    pub fn run(&mut self) -> Result<Infallible, Error<M::Error, S::Error>> {
        self.announce()?;
        loop {
            self.poll()?;
        }
    }

    /// Handles at most one buffered command.
    ///
    /// Returns immediately when no input is waiting. Lines that trim to
    /// nothing (the terminator a payload integer leaves behind) are
    /// skipped rather than reported as unknown commands.
    pub fn poll(&mut self) -> Result<(), Error<M::Error, S::Error>> {
        if self.framer.available() == 0 {
            return Ok(());
        }
        let mut line: String<LINE_MAX> = String::new();
        self.framer.read_line(&mut line).map_err(Error::Serial)?;
        let command = line.trim();
        if command.is_empty() {
            return Ok(());
        }

        if command.eq_ignore_ascii_case("READ") {
            self.cmd_read()
        } else if command.eq_ignore_ascii_case("ERASE") {
            self.cmd_erase()
        } else if command.eq_ignore_ascii_case("WRITE") {
            self.cmd_write()
        } else if command.eq_ignore_ascii_case("WRITE_BYTE") {
            self.cmd_write_byte()
        } else if command.eq_ignore_ascii_case("READ_BYTE") {
            self.cmd_read_byte()
        } else {
            self.framer
                .emit_fmt(format_args!(
                    "Unknown command: '{}'. Use READ, WRITE, ERASE",
                    command
                ))
                .map_err(Error::Serial)
        }
    }

    /// Releases the memory device, endpoint and timer.
    pub fn free(self) -> (M, S, T) {
        let (serial, timer) = self.framer.free();
        (self.mem, serial, timer)
    }

    /// `READ <max>`: hex-dump rows covering `0..=max`, then the end token.
    ///
    /// The bound rounds up to a whole row; addresses past it are dumped
    /// along with the rest of their row.
    fn cmd_read(&mut self) -> Result<(), Error<M::Error, S::Error>> {
        let max = self.framer.parse_uint().map_err(Error::Serial)? as u16;
        info!("READ up to {:#06x}", max);

        let mut row = [0u8; ROW_LEN];
        for base in (0..=max).step_by(ROW_LEN) {
            self.mem.read_row(base, &mut row).map_err(Error::Memory)?;
            self.framer
                .emit_fmt(format_args!("{}", Row(base, &row)))
                .map_err(Error::Serial)?;
        }
        self.framer.emit_end().map_err(Error::Serial)
    }

    /// `ERASE <max>`: blanket 0xFF fill of `0..=max`, then the end token.
    fn cmd_erase(&mut self) -> Result<(), Error<M::Error, S::Error>> {
        let max = self.framer.parse_uint().map_err(Error::Serial)? as u16;
        info!("ERASE up to {:#06x}", max);

        self.mem.erase(max).map_err(Error::Memory)?;
        self.framer.emit_end().map_err(Error::Serial)
    }

    /// `WRITE <length>`: acknowledged chunked image transfer.
    ///
    /// The length is echoed back so the host knows the server is ready and
    /// the byte that terminated the length line is discarded. The image
    /// then arrives in chunks of at most [`CHUNK_SIZE`] bytes, each
    /// acknowledged before the host may send the next. A chunk that does
    /// not arrive in full within [`READ_TIMEOUT`] aborts the transfer with
    /// an error line naming the stalled address; either way the exchange
    /// closes with the end token.
    fn cmd_write(&mut self) -> Result<(), Error<M::Error, S::Error>> {
        // Lengths live in the device's 16-bit address space.
        let total = usize::from(self.framer.parse_uint().map_err(Error::Serial)? as u16);
        self.framer
            .emit_fmt(format_args!("{}", total))
            .map_err(Error::Serial)?;
        // The separator that ended the length line.
        let _ = self.framer.read_u8().map_err(Error::Serial)?;
        info!("WRITE of {} bytes", total);

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut written = 0usize;
        while written < total {
            let want = (total - written).min(CHUNK_SIZE);
            if self.framer.wait_for(want, READ_TIMEOUT) == Wait::TimedOut {
                self.emit_stall(written)?;
                break;
            }
            let got = self
                .framer
                .read_exact(&mut chunk[..want])
                .map_err(Error::Serial)?;
            if got < want {
                // The endpoint went dry after reporting enough buffered
                // bytes; give up on the transfer rather than acknowledge
                // a chunk that was never programmed.
                self.emit_stall(written)?;
                break;
            }
            trace!("chunk at {:#06x}: {:?}", written, HexSlice(&chunk[..got]));
            self.mem
                .write_region(written as u16, &chunk[..got])
                .map_err(Error::Memory)?;
            written += got;
            self.framer.emit_ack().map_err(Error::Serial)?;
        }
        self.framer.emit_end().map_err(Error::Serial)
    }

    /// `WRITE_BYTE <addr> <value>`: program one byte, acknowledge.
    fn cmd_write_byte(&mut self) -> Result<(), Error<M::Error, S::Error>> {
        let address = self.framer.parse_uint().map_err(Error::Serial)? as u16;
        let value = self.framer.parse_uint().map_err(Error::Serial)? as u8;

        self.mem.write_byte(address, value).map_err(Error::Memory)?;
        self.framer.emit_ack().map_err(Error::Serial)
    }

    /// `READ_BYTE <addr>`: the addressed byte as two uppercase hex digits.
    fn cmd_read_byte(&mut self) -> Result<(), Error<M::Error, S::Error>> {
        let address = self.framer.parse_uint().map_err(Error::Serial)? as u16;

        let value = self.mem.read_byte(address).map_err(Error::Memory)?;
        self.framer
            .emit_fmt(format_args!("{:02X}", value))
            .map_err(Error::Serial)
    }

    fn emit_stall(&mut self, address: usize) -> Result<(), Error<M::Error, S::Error>> {
        self.framer
            .emit_fmt(format_args!(
                "Timeout waiting for bytes at address: {:X}",
                address
            ))
            .map_err(Error::Serial)
    }
}
