//! An [`embedded-hal`]-based parallel EEPROM programmer.
//!
//! This crate drives 28C64/28C256-style parallel EEPROM chips through a
//! cascaded pair of 8-bit shift registers (address bus plus the chip's
//! output-enable line) and a directly connected 8-bit data bus, and serves
//! the line-oriented serial protocol used to program them from a host
//! machine: hex dumps, single-byte accesses, chip erase, and acknowledged
//! chunked image transfers with timeout recovery.
//!
//! Control pins use the `embedded-hal` digital and delay traits; the two
//! things `embedded-hal` 0.2 has no vocabulary for — a direction-switched
//! data-bus line and a buffered serial endpoint with an available-byte
//! count — are the [`DataPin`] and [`SerialPort`] traits below.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/

#![doc(html_root_url = "https://docs.rs/parallel-eeprom/0.1.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
mod error;
pub mod bus;
pub mod framer;
pub mod image;
pub mod prelude;
pub mod server;
pub mod shift;
mod utils;

#[cfg(test)]
pub(crate) mod mock;

pub use crate::error::Error;

/// Direction of a bidirectional data-bus line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The line is sampled; the EEPROM may drive it.
    Input,
    /// The line is driven from this side.
    Output,
}

/// One line of the bidirectional EEPROM data bus.
///
/// The eight data lines alternate between driving the bus (programming) and
/// sampling it (readback). Output-only control lines use
/// [`embedded_hal::digital::v2::OutputPin`] as usual.
pub trait DataPin {
    type Error;

    /// Reconfigures the line driver.
    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error>;

    /// Drives the line. Only meaningful after switching to [`Direction::Output`].
    fn set(&mut self, high: bool) -> Result<(), Self::Error>;

    /// Samples the line. Only meaningful after switching to [`Direction::Input`].
    fn get(&self) -> Result<bool, Self::Error>;
}

/// Byte-oriented serial endpoint provided by the runtime.
///
/// Models the buffered UART every firmware runtime exposes: a count of
/// received bytes, non-blocking single-byte reads with one byte of
/// lookahead, and a transmit path. Blocking behaviour is built on top with
/// [`nb::block!`].
pub trait SerialPort {
    type Error;

    /// Number of received bytes buffered and immediately readable.
    fn available(&self) -> usize;

    /// Pops one received byte. `WouldBlock` while the buffer is empty.
    fn read(&mut self) -> nb::Result<u8, Self::Error>;

    /// Next received byte without consuming it.
    fn peek(&mut self) -> nb::Result<u8, Self::Error>;

    /// Queues one byte for transmission.
    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error>;
}

/// Byte-level access to a parallel memory device.
pub trait Memory {
    type Error;

    /// Reads the byte stored at `address`.
    fn read_byte(&mut self, address: u16) -> Result<u8, Self::Error>;

    /// Programs one byte and waits out the device's write cycle.
    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), Self::Error>;
}

/// Supported EEPROM devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip {
    /// 28C64, 8 KiB (addresses `0x0000..=0x1FFF`).
    C28c64,
    /// 28C256, 32 KiB (addresses `0x0000..=0x7FFF`).
    C28c256,
}

impl Chip {
    /// The device's last valid address.
    pub fn max_addr(self) -> u16 {
        match self {
            Chip::C28c64 => 0x1FFF,
            Chip::C28c256 => 0x7FFF,
        }
    }
}

impl core::str::FromStr for Chip {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("28c64") {
            Ok(Chip::C28c64)
        } else if s.eq_ignore_ascii_case("28c256") {
            Ok(Chip::C28c256)
        } else {
            Err("unknown chip (expected 28c64 or 28c256)")
        }
    }
}
