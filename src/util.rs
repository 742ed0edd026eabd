use log::{error, info};

use structopt::StructOpt;

use linux_embedded_hal::sysfs_gpio;
use linux_embedded_hal::{Delay, Pin as Pindev, SysTimer};

use simplelog::{LevelFilter, TermLogger, TerminalMode};

use ihex::{Reader, Record};

use std::convert::TryInto;
use std::io::{Read as _, Write as _};

use parallel_eeprom::bus::EepromBus;
use parallel_eeprom::image::{ImageOps, Row, ROW_LEN};
use parallel_eeprom::server::Server;
use parallel_eeprom::shift::ShiftRegister;
use parallel_eeprom::{Chip, DataPin, Direction, Memory};

#[derive(Debug, PartialEq, StructOpt)]
struct Options {
    #[structopt(subcommand)]
    operation: Operations,

    /// Shift register serial data (output) pin
    #[structopt(long, default_value = "2", env = "SHIFT_DATA_PIN")]
    shift_data_pin: u64,

    /// Shift register clock (output) pin
    #[structopt(long, default_value = "3", env = "SHIFT_CLOCK_PIN")]
    shift_clock_pin: u64,

    /// Shift register latch (output) pin
    #[structopt(long, default_value = "4", env = "SHIFT_LATCH_PIN")]
    shift_latch_pin: u64,

    /// EEPROM /WE (output) pin
    #[structopt(long, default_value = "13", env = "WRITE_EN_PIN")]
    write_en_pin: u64,

    /// The eight data bus pins, D0 first
    #[structopt(
        long,
        use_delimiter = true,
        default_value = "5,6,7,8,9,10,11,12",
        env = "DATA_PINS"
    )]
    data_pins: Vec<u64>,

    /// Target chip, sets the default address bound
    #[structopt(long, default_value = "28c256", env = "CHIP")]
    chip: Chip,

    /// Configure log level
    #[structopt(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: LevelFilter,
}

#[derive(Debug, PartialEq, StructOpt)]
enum Operations {
    /// Read a range and print it as a hex dump
    Read {
        /// First address of the range in hex
        #[structopt(parse(try_from_str = parse_hex), default_value = "0")]
        address: u16,

        /// Number of bytes to read
        length: u16,
    },
    /// Read a single byte
    ReadByte {
        /// Address in hex
        #[structopt(parse(try_from_str = parse_hex))]
        address: u16,
    },
    /// Write a hex byte string at an address
    Write {
        /// Start address in hex
        #[structopt(parse(try_from_str = parse_hex))]
        address: u16,

        /// Data to write in hexadecimal
        #[structopt(long)]
        data: HexData,
    },
    /// Fill the chip with 0xff
    Erase {
        /// Last address to erase in hex; defaults to the whole chip
        #[structopt(parse(try_from_str = parse_hex))]
        max: Option<u16>,
    },
    /// Dump the chip into an Intel HEX file
    Dump {
        /// Last address to dump in hex; defaults to the whole chip
        #[structopt(parse(try_from_str = parse_hex))]
        max: Option<u16>,

        /// Output ihex file
        #[structopt(long, default_value = "dump.ihex")]
        file: String,
    },
    /// Program an Intel HEX file
    Load {
        /// Input ihex file
        file: String,
    },
    /// Program a raw binary image starting at address zero
    Burn {
        /// Input binary file
        file: String,
    },
    /// Serve the line-oriented programming protocol on a serial device
    Serve {
        /// Serial device path
        #[structopt(default_value = "/dev/ttyUSB0")]
        device: String,

        /// Baud rate
        #[structopt(long, default_value = "115200")]
        baud: u32,
    },
}

#[derive(Debug, PartialEq)]
pub struct HexData(Vec<u8>);

impl std::str::FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(HexData)
    }
}

fn parse_hex(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// Sysfs GPIO line used on the EEPROM data bus.
struct SysfsData(Pindev);

impl DataPin for SysfsData {
    type Error = sysfs_gpio::Error;

    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error> {
        let direction = match direction {
            Direction::Input => sysfs_gpio::Direction::In,
            Direction::Output => sysfs_gpio::Direction::Out,
        };
        self.0.set_direction(direction)
    }

    fn set(&mut self, high: bool) -> Result<(), Self::Error> {
        self.0.set_value(high as u8)
    }

    fn get(&self) -> Result<bool, Self::Error> {
        Ok(self.0.get_value()? != 0)
    }
}

fn output_pin(number: u64) -> Result<Pindev, sysfs_gpio::Error> {
    let pin = Pindev::new(number);
    pin.export()?;
    pin.set_direction(sysfs_gpio::Direction::Out)?;
    Ok(pin)
}

fn data_pin(number: u64) -> Result<SysfsData, sysfs_gpio::Error> {
    let pin = Pindev::new(number);
    pin.export()?;
    Ok(SysfsData(pin))
}

/// Buffered tty endpoint for the command server.
struct Tty {
    port: Box<dyn serialport::SerialPort>,
    peeked: Option<u8>,
}

impl Tty {
    fn open(path: &str, baud: u32) -> serialport::Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(std::time::Duration::from_millis(10))
            .open()?;
        Ok(Tty { port, peeked: None })
    }

    fn poll_byte(&mut self) -> nb::Result<u8, std::io::Error> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Err(nb::Error::WouldBlock),
            Ok(_) => Ok(byte[0]),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Err(nb::Error::WouldBlock)
            }
            Err(e) => Err(nb::Error::Other(e)),
        }
    }
}

impl parallel_eeprom::SerialPort for Tty {
    type Error = std::io::Error;

    fn available(&self) -> usize {
        let buffered = self.port.bytes_to_read().unwrap_or(0) as usize;
        buffered + self.peeked.is_some() as usize
    }

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if let Some(byte) = self.peeked.take() {
            return Ok(byte);
        }
        self.poll_byte()
    }

    fn peek(&mut self) -> nb::Result<u8, Self::Error> {
        if let Some(byte) = self.peeked {
            return Ok(byte);
        }
        let byte = self.poll_byte()?;
        self.peeked = Some(byte);
        Ok(byte)
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        self.port.write_all(&[byte]).map_err(nb::Error::Other)
    }
}

type Bus = EepromBus<Pindev, Pindev, Pindev, Pindev, SysfsData, Delay>;

fn main() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let opts = Options::from_args();

    TermLogger::init(
        opts.log_level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
    )
    .unwrap();

    if opts.data_pins.len() != 8 {
        return Err("expected exactly eight data bus pins, D0 first".into());
    }

    let addr = ShiftRegister::new(
        output_pin(opts.shift_data_pin)?,
        output_pin(opts.shift_clock_pin)?,
        output_pin(opts.shift_latch_pin)?,
    )?;
    let mut bus_pins = Vec::with_capacity(8);
    for &number in &opts.data_pins {
        bus_pins.push(data_pin(number)?);
    }
    let bus_pins: [SysfsData; 8] = bus_pins
        .try_into()
        .map_err(|_| "data bus pin list did not convert")?;

    let mut eeprom = Bus::new(addr, output_pin(opts.write_en_pin)?, bus_pins, Delay)?;

    match opts.operation {
        Operations::Read { address, length } => {
            info!("Reading {} bytes from 0x{:04x}", length, address);

            let mut row = [0u8; ROW_LEN];
            let mut base = address;
            let mut remaining = length;
            while remaining > 0 {
                eeprom.read_row(base, &mut row)?;
                println!("{}", Row(base, &row));
                base = base.wrapping_add(ROW_LEN as u16);
                remaining = remaining.saturating_sub(ROW_LEN as u16);
            }
        }
        Operations::ReadByte { address } => {
            println!("{:02x}", eeprom.read_byte(address)?);
        }
        Operations::Write { address, data } => {
            info!("Writing {} bytes at 0x{:04x}", data.0.len(), address);

            eeprom.write_region(address, &data.0)?;

            info!("Write complete");
        }
        Operations::Erase { max } => {
            let max = max.unwrap_or_else(|| opts.chip.max_addr());
            info!("Erasing up to 0x{:04x}", max);

            eeprom.erase(max)?;

            info!("Erase complete");
        }
        Operations::Dump { max, file } => {
            let max = max.unwrap_or_else(|| opts.chip.max_addr());
            info!("Dumping up to 0x{:04x} into {}", max, file);

            let mut records = Vec::new();
            let mut row = [0u8; ROW_LEN];
            for base in (0..=max).step_by(ROW_LEN) {
                eeprom.read_row(base, &mut row)?;
                records.push(Record::Data {
                    offset: base,
                    value: row.to_vec(),
                });
            }
            records.push(Record::EndOfFile);

            let data = ihex::create_object_file_representation(&records)?;
            std::fs::write(file, data)?;

            info!("Dump complete");
        }
        Operations::Load { file } => {
            info!("Loading {}", file);

            let text = std::fs::read_to_string(&file)?;
            for record in Reader::new(&text) {
                match record? {
                    Record::Data { offset, value } => {
                        info!("Writing {} bytes at 0x{:04x}", value.len(), offset);
                        eeprom.write_region(offset, &value)?;
                    }
                    Record::EndOfFile => (),
                    other => {
                        error!("Unsupported record: {:?}", other);
                        return Err("unsupported ihex record".into());
                    }
                }
            }

            info!("Load complete");
        }
        Operations::Burn { file } => {
            let image = std::fs::read(&file)?;
            if image.is_empty() {
                return Err("empty image".into());
            }
            if image.len() > 1 << 16 {
                return Err("image larger than the 16-bit address space".into());
            }
            info!("Burning {} bytes from {}", image.len(), file);

            eeprom.write_image(&image, (image.len() - 1) as u16)?;

            info!("Burn complete");
        }
        Operations::Serve { device, baud } => {
            info!("Serving on {} at {} baud", device, baud);

            let tty = Tty::open(&device, baud)?;
            let mut server = Server::new(eeprom, tty, SysTimer::new());
            match server.run() {
                Ok(never) => match never {},
                Err(e) => {
                    error!("Server stopped: {}", e);
                    return Err("server stopped".into());
                }
            }
        }
    }

    Ok(())
}
