//! Pin-level driver for 28C64/28C256 parallel EEPROMs.

use bitflags::bitflags;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::digital::v2::OutputPin;

use crate::shift::ShiftRegister;
use crate::{DataPin, Direction, Memory};

/// Width of the /WE low pulse. The 28C series wants at least 100 ns; one
/// microsecond is the shortest delay most runtimes can express.
const WRITE_PULSE_US: u16 = 1;

/// Worst-case self-timed byte write cycle of the device.
const WRITE_CYCLE_MS: u16 = 6;

bitflags! {
    /// Layout of the high byte latched into the shift register cascade.
    ///
    /// Bit 15 of the latched word is not an address line: it drives the
    /// EEPROM's /OE input. Setting it tri-states the chip's data drivers so
    /// the bus can be driven from this side. Addresses therefore never use
    /// bit 15, whatever the caller passes in.
    pub struct HighByte: u8 {
        /// /OE driven high: the EEPROM releases the data bus.
        const OUTPUT_DISABLE = 1 << 7;
        /// Address lines A14..A8.
        const ADDR = 0x7F;
    }
}

/// Driver for a parallel EEPROM behind a shift-register address bus.
///
/// # Type Parameters
///
/// * **`DATA`**, **`CLOCK`**, **`LATCH`**: the shift register cascade pins.
/// * **`WE`**: the pin wired to the EEPROM's /WE input. Active low, parked
///   high.
/// * **`P`**: one bidirectional data-bus line; eight of them form D0..D7.
/// * **`D`**: delay provider for the write timing contract.
#[derive(Debug)]
pub struct EepromBus<DATA, CLOCK, LATCH, WE, P, D> {
    addr: ShiftRegister<DATA, CLOCK, LATCH>,
    write_en: WE,
    bus: [P; 8],
    delay: D,
}

impl<E, DATA, CLOCK, LATCH, WE, P, D> EepromBus<DATA, CLOCK, LATCH, WE, P, D>
where
    DATA: OutputPin<Error = E>,
    CLOCK: OutputPin<Error = E>,
    LATCH: OutputPin<Error = E>,
    WE: OutputPin<Error = E>,
    P: DataPin<Error = E>,
    D: DelayUs<u16> + DelayMs<u16>,
{
    /// Creates a driver and parks /WE high (deasserted).
    ///
    /// `bus` holds the data lines in order, D0 first.
    pub fn new(
        addr: ShiftRegister<DATA, CLOCK, LATCH>,
        mut write_en: WE,
        bus: [P; 8],
        delay: D,
    ) -> Result<Self, E> {
        write_en.set_high()?;
        Ok(EepromBus {
            addr,
            write_en,
            bus,
            delay,
        })
    }

    /// Latches `address` onto the EEPROM's address lines.
    ///
    /// With `output_enable` the chip drives the data bus with the addressed
    /// byte; without it the chip tri-states and the bus may be driven from
    /// this side. No data-bus activity happens here.
    pub fn present_address(&mut self, address: u16, output_enable: bool) -> Result<(), E> {
        let mut high = HighByte::from_bits_truncate((address >> 8) as u8) & HighByte::ADDR;
        if !output_enable {
            high |= HighByte::OUTPUT_DISABLE;
        }
        self.addr
            .write_word(u16::from_be_bytes([high.bits(), address as u8]))
    }

    /// Releases the driver, returning the pins.
    pub fn free(self) -> (ShiftRegister<DATA, CLOCK, LATCH>, WE, [P; 8], D) {
        (self.addr, self.write_en, self.bus, self.delay)
    }

    fn set_bus_direction(&mut self, direction: Direction) -> Result<(), E> {
        for pin in self.bus.iter_mut() {
            pin.set_direction(direction)?;
        }
        Ok(())
    }
}

impl<E, DATA, CLOCK, LATCH, WE, P, D> Memory for EepromBus<DATA, CLOCK, LATCH, WE, P, D>
where
    DATA: OutputPin<Error = E>,
    CLOCK: OutputPin<Error = E>,
    LATCH: OutputPin<Error = E>,
    WE: OutputPin<Error = E>,
    P: DataPin<Error = E>,
    D: DelayUs<u16> + DelayMs<u16>,
{
    type Error = E;

    /// Reads one byte.
    ///
    /// The bus switches to input before /OE is asserted, so the chip and
    /// this driver never drive the bus at the same time. D7 is sampled
    /// first and the result assembled MSB-first; the shift-out preceding
    /// the sample covers the device's access time on AVR-class runtimes,
    /// faster hosts must delay in their [`DataPin`] impl.
    fn read_byte(&mut self, address: u16) -> Result<u8, Self::Error> {
        self.set_bus_direction(Direction::Input)?;
        self.present_address(address, true)?;
        let mut value = 0u8;
        for pin in self.bus.iter().rev() {
            value = (value << 1) | pin.get()? as u8;
        }
        Ok(value)
    }

    /// Programs one byte and waits out the write cycle.
    ///
    /// /OE is released before the bus switches to output, data is valid on
    /// the bus before the /WE falling edge, and the call only returns once
    /// the self-timed cycle has had its full [`WRITE_CYCLE_MS`]. The value
    /// goes out LSB-onto-D0, the mirror of `read_byte`'s sampling order.
    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), Self::Error> {
        self.present_address(address, false)?;
        self.set_bus_direction(Direction::Output)?;
        for (bit, pin) in self.bus.iter_mut().enumerate() {
            pin.set(value & (1 << bit) != 0)?;
        }
        self.write_en.set_low()?;
        self.delay.delay_us(WRITE_PULSE_US);
        self.write_en.set_high()?;
        self.delay.delay_ms(WRITE_CYCLE_MS);
        Ok(())
    }
}
