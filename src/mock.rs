//! Test doubles: a pin-accurate simulation of the shift register cascade
//! and EEPROM, plus scripted serial endpoints, timers and memories.
//!
//! The simulation models the wiring contract rather than any driver
//! behaviour: clock edges shift bits, the latch edge publishes the word,
//! the /WE falling edge commits whatever the data pins drive, and a read
//! of a data pin returns the addressed byte only while /OE is asserted.
//! Driving the bus from both sides at once trips a sticky contention flag.

use core::convert::Infallible;
use core::time::Duration;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::timer::CountDown;
use void::Void;

use crate::{DataPin, Direction, Memory, SerialPort};

/// Address space of the simulated chip (a 28C256).
pub const SIM_MEM: usize = 1 << 15;

/// Externally observable bus activity, in order of occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A word was published on the shift register outputs.
    Latch(u16),
    WeLow,
    WeHigh,
    DelayUs(u16),
    DelayMs(u16),
}

#[derive(Debug)]
struct SimState {
    shift: u16,
    latched: u16,
    data_level: bool,
    clock_level: bool,
    latch_level: bool,
    we_level: bool,
    directions: [Direction; 8],
    driven: [bool; 8],
    mem: Vec<u8>,
    events: Vec<Event>,
    latch_pulses: usize,
    contention: bool,
}

impl SimState {
    fn output_enabled(&self) -> bool {
        self.latched & 0x8000 == 0
    }

    fn address(&self) -> usize {
        (self.latched & 0x7FFF) as usize
    }

    fn check_contention(&mut self) {
        if self.output_enabled() && self.directions.iter().any(|&d| d == Direction::Output) {
            self.contention = true;
        }
    }

    fn pin_write(&mut self, role: Role, high: bool) {
        match role {
            Role::ShiftData => self.data_level = high,
            Role::ShiftClock => {
                if high && !self.clock_level {
                    self.shift = (self.shift << 1) | self.data_level as u16;
                }
                self.clock_level = high;
            }
            Role::ShiftLatch => {
                if high && !self.latch_level {
                    self.latched = self.shift;
                    self.latch_pulses += 1;
                    self.events.push(Event::Latch(self.latched));
                    self.check_contention();
                }
                self.latch_level = high;
            }
            Role::WriteEnable => {
                if !high && self.we_level {
                    self.events.push(Event::WeLow);
                    self.commit();
                } else if high && !self.we_level {
                    self.events.push(Event::WeHigh);
                }
                self.we_level = high;
            }
        }
    }

    /// A /WE falling edge latches address and data into the chip.
    fn commit(&mut self) {
        if self.output_enabled() {
            self.contention = true;
            return;
        }
        if self.directions.iter().any(|&d| d == Direction::Input) {
            // Nothing drives the undirected lines; the write is garbage,
            // leave the cell alone so the test notices.
            return;
        }
        let mut value = 0u8;
        for (bit, &high) in self.driven.iter().enumerate() {
            value |= (high as u8) << bit;
        }
        let address = self.address();
        self.mem[address] = value;
    }
}

/// Handle to one simulated board; clones share state.
#[derive(Debug, Clone)]
pub struct Simulator(Rc<RefCell<SimState>>);

#[derive(Debug, Clone, Copy)]
enum Role {
    ShiftData,
    ShiftClock,
    ShiftLatch,
    WriteEnable,
}

impl Simulator {
    pub fn new() -> Self {
        Simulator(Rc::new(RefCell::new(SimState {
            shift: 0,
            latched: 0,
            data_level: false,
            clock_level: false,
            latch_level: false,
            we_level: true,
            directions: [Direction::Input; 8],
            driven: [false; 8],
            mem: vec![0; SIM_MEM],
            events: Vec::new(),
            latch_pulses: 0,
            contention: false,
        })))
    }

    pub fn shift_data(&self) -> ControlPin {
        ControlPin {
            sim: self.clone(),
            role: Role::ShiftData,
        }
    }

    pub fn shift_clock(&self) -> ControlPin {
        ControlPin {
            sim: self.clone(),
            role: Role::ShiftClock,
        }
    }

    pub fn shift_latch(&self) -> ControlPin {
        ControlPin {
            sim: self.clone(),
            role: Role::ShiftLatch,
        }
    }

    pub fn write_enable(&self) -> ControlPin {
        ControlPin {
            sim: self.clone(),
            role: Role::WriteEnable,
        }
    }

    pub fn data_pins(&self) -> [BusPin; 8] {
        let mut index = 0u8;
        [(); 8].map(|_| {
            let pin = BusPin {
                sim: self.clone(),
                index,
            };
            index += 1;
            pin
        })
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay { sim: self.clone() }
    }

    pub fn latched(&self) -> u16 {
        self.0.borrow().latched
    }

    pub fn latch_pulses(&self) -> usize {
        self.0.borrow().latch_pulses
    }

    pub fn contention(&self) -> bool {
        self.0.borrow().contention
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    pub fn preload(&self, address: u16, value: u8) {
        self.0.borrow_mut().mem[address as usize & (SIM_MEM - 1)] = value;
    }

    pub fn mem(&self, address: u16) -> u8 {
        self.0.borrow().mem[address as usize & (SIM_MEM - 1)]
    }
}

/// Output-only pin of the simulated board.
#[derive(Debug)]
pub struct ControlPin {
    sim: Simulator,
    role: Role,
}

impl OutputPin for ControlPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.sim.0.borrow_mut().pin_write(self.role, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.sim.0.borrow_mut().pin_write(self.role, true);
        Ok(())
    }
}

/// One simulated data-bus line.
#[derive(Debug)]
pub struct BusPin {
    sim: Simulator,
    index: u8,
}

impl DataPin for BusPin {
    type Error = Infallible;

    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error> {
        let mut state = self.sim.0.borrow_mut();
        state.directions[self.index as usize] = direction;
        state.check_contention();
        Ok(())
    }

    fn set(&mut self, high: bool) -> Result<(), Self::Error> {
        let mut state = self.sim.0.borrow_mut();
        state.driven[self.index as usize] = high;
        if state.directions[self.index as usize] == Direction::Output {
            state.check_contention();
        }
        Ok(())
    }

    fn get(&self) -> Result<bool, Self::Error> {
        let state = self.sim.0.borrow();
        if state.output_enabled() {
            let byte = state.mem[state.address()];
            Ok(byte & (1 << self.index) != 0)
        } else {
            // Floating bus.
            Ok(false)
        }
    }
}

/// Delay provider that records instead of sleeping.
#[derive(Debug)]
pub struct SimDelay {
    sim: Simulator,
}

impl DelayUs<u16> for SimDelay {
    fn delay_us(&mut self, us: u16) {
        self.sim.0.borrow_mut().events.push(Event::DelayUs(us));
    }
}

impl DelayMs<u16> for SimDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.sim.0.borrow_mut().events.push(Event::DelayMs(ms));
    }
}

#[derive(Debug)]
struct SerialState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    force_available: usize,
}

/// Scripted serial endpoint; clones share the same buffers, so tests keep
/// a handle while the server owns another.
#[derive(Debug, Clone)]
pub struct MockSerial(Rc<RefCell<SerialState>>);

impl MockSerial {
    pub fn new() -> Self {
        MockSerial(Rc::new(RefCell::new(SerialState {
            rx: VecDeque::new(),
            tx: Vec::new(),
            force_available: 0,
        })))
    }

    /// Queues host-to-firmware bytes.
    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Received bytes not yet consumed (ignores any forced count).
    pub fn pending(&self) -> usize {
        self.0.borrow().rx.len()
    }

    /// Makes `available` over-report, for short-read fault injection.
    pub fn force_available(&self, count: usize) {
        self.0.borrow_mut().force_available = count;
    }

    /// Everything the firmware transmitted, as text.
    pub fn output(&self) -> String {
        String::from_utf8(self.0.borrow().tx.clone()).unwrap()
    }

    /// Transmitted output split into lines.
    pub fn lines(&self) -> Vec<String> {
        self.output().lines().map(str::to_owned).collect()
    }
}

impl SerialPort for MockSerial {
    type Error = Infallible;

    fn available(&self) -> usize {
        let state = self.0.borrow();
        state.rx.len().max(state.force_available)
    }

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.0
            .borrow_mut()
            .rx
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }

    fn peek(&mut self) -> nb::Result<u8, Self::Error> {
        self.0
            .borrow()
            .rx
            .front()
            .copied()
            .ok_or(nb::Error::WouldBlock)
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        self.0.borrow_mut().tx.push(byte);
        Ok(())
    }
}

/// Countdown timer driven by poll count instead of wall-clock time.
#[derive(Debug)]
pub struct MockTimer {
    fuse: Option<u32>,
    remaining: u32,
    /// Every deadline passed to `start`, in order.
    pub starts: Vec<Duration>,
}

impl MockTimer {
    /// A timer that never fires.
    pub fn never() -> Self {
        MockTimer {
            fuse: None,
            remaining: 0,
            starts: Vec::new(),
        }
    }

    /// A timer that fires after `polls` calls to `wait` per started
    /// countdown.
    pub fn fused(polls: u32) -> Self {
        MockTimer {
            fuse: Some(polls),
            remaining: polls,
            starts: Vec::new(),
        }
    }
}

impl CountDown for MockTimer {
    type Time = Duration;

    fn start<T>(&mut self, count: T)
    where
        T: Into<Duration>,
    {
        self.starts.push(count.into());
        if let Some(fuse) = self.fuse {
            self.remaining = fuse;
        }
    }

    fn wait(&mut self) -> nb::Result<(), Void> {
        match self.fuse {
            None => Err(nb::Error::WouldBlock),
            Some(_) => {
                if self.remaining == 0 {
                    Ok(())
                } else {
                    self.remaining -= 1;
                    Err(nb::Error::WouldBlock)
                }
            }
        }
    }
}

/// Flat in-memory [`Memory`] with a write journal.
#[derive(Debug)]
pub struct MockMemory {
    /// Full 16-bit address space, so wraparound behaviour stays visible.
    pub cells: Vec<u8>,
    /// Every `(address, value)` programmed, in order.
    pub writes: Vec<(u16, u8)>,
}

impl MockMemory {
    pub fn new() -> Self {
        MockMemory {
            cells: vec![0; 1 << 16],
            writes: Vec::new(),
        }
    }
}

impl Memory for MockMemory {
    type Error = Infallible;

    fn read_byte(&mut self, address: u16) -> Result<u8, Self::Error> {
        Ok(self.cells[address as usize])
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), Self::Error> {
        self.cells[address as usize] = value;
        self.writes.push((address, value));
        Ok(())
    }
}
