//! Mock implementations for testing
//!
//! Every mock can share an [`EventLog`] so a test can assert the exact order
//! of pin, bus, delay and timer activity across peripherals. Handles are
//! cheap clones over shared state: keep a clone in the test, hand the other to
//! the code under test.

#![cfg(any(test, feature = "std"))]

extern crate std;

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin, StatefulOutputPin};
use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource};
use embedded_hal::pwm::{self, SetDutyCycle};
use embedded_hal::spi::{self, SpiDevice};
use embedded_storage::{ReadStorage, Storage};

use crate::board::Board;
use crate::pca9505::{BANKS_PER_CHIP, CONFIG_IO_REGISTER};
use crate::servo::{Servo, MAX_ANGLE_DEGREES};
use crate::timer::PeriodicTimer;

/// One observable hardware action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwEvent {
    /// Pin driven high.
    PinHigh(u8),
    /// Pin driven low.
    PinLow(u8),
    /// Bytes written to the potentiometer within one chip-select frame.
    PotWrite(Vec<u8>),
    /// Bytes written to an expander.
    I2cWrite {
        /// 7-bit address
        address: u8,
        /// Payload, register first
        bytes: Vec<u8>,
    },
    /// One byte read back from an expander.
    I2cRead {
        /// 7-bit address
        address: u8,
        /// Value returned
        byte: u8,
    },
    /// Address not acknowledged.
    I2cNack {
        /// 7-bit address
        address: u8,
    },
    /// Blocking delay.
    DelayUs(u32),
    /// Timer period programmed.
    TimerPeriod(u32),
    /// Timer (re)started.
    TimerRestart,
    /// Timer stopped.
    TimerStop,
    /// Servo attached to a pin.
    ServoAttach(u8),
    /// Servo commanded to an angle.
    ServoAngle(u8),
    /// Light PWM duty set.
    LightDuty(u16),
}

/// Shared, ordered record of [`HwEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<HwEvent>>>);

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn push(&self, event: HwEvent) {
        self.0.borrow_mut().push(event);
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<HwEvent> {
        self.0.borrow().clone()
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Number of events matching `pred`
    pub fn count(&self, pred: impl Fn(&HwEvent) -> bool) -> usize {
        self.0.borrow().iter().filter(|e| pred(e)).count()
    }

    /// Recorded events with waveform pin toggles removed.
    ///
    /// The timer interrupt toggles the waveform legs asynchronously in real
    /// hardware; sequencing assertions usually want to ignore them.
    pub fn without_pins(&self, pins: &[u8]) -> Vec<HwEvent> {
        self.0
            .borrow()
            .iter()
            .filter(|e| match e {
                HwEvent::PinHigh(p) | HwEvent::PinLow(p) => !pins.contains(p),
                _ => true,
            })
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// GPIO
// ---------------------------------------------------------------------------

/// Output pin with a readable level.
#[derive(Debug, Clone)]
pub struct MockPin {
    number: u8,
    level: Rc<Cell<bool>>,
    log: EventLog,
}

impl MockPin {
    /// Create a pin that starts low
    pub fn new(number: u8, log: &EventLog) -> Self {
        Self {
            number,
            level: Rc::new(Cell::new(false)),
            log: log.clone(),
        }
    }

    /// Current level
    pub fn is_high(&self) -> bool {
        self.level.get()
    }

    /// Pin number this mock stands for
    pub fn number(&self) -> u8 {
        self.number
    }

    fn drive(&self, high: bool) {
        self.level.set(high);
        self.log.push(if high {
            HwEvent::PinHigh(self.number)
        } else {
            HwEvent::PinLow(self.number)
        });
    }
}

impl digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}

impl StatefulOutputPin for MockPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level.get())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level.get())
    }
}

// ---------------------------------------------------------------------------
// Expander bus
// ---------------------------------------------------------------------------

const REGISTER_FILE_LEN: usize = 0x28;

#[derive(Debug, Clone)]
struct SimulatedExpander {
    registers: [u8; REGISTER_FILE_LEN],
    pointer: u8,
    stuck_config_bank: Option<u8>,
    fail_writes: bool,
}

impl SimulatedExpander {
    fn new() -> Self {
        // Power-on: all pins inputs, output latches high.
        Self {
            registers: [0xFF; REGISTER_FILE_LEN],
            pointer: 0,
            stuck_config_bank: None,
            fail_writes: false,
        }
    }

    fn store(&mut self, value: u8) {
        let stuck = self
            .stuck_config_bank
            .is_some_and(|bank| self.pointer == CONFIG_IO_REGISTER.wrapping_add(bank));
        if let Some(slot) = self.registers.get_mut(usize::from(self.pointer)) {
            *slot = if stuck { 0xFF } else { value };
        }
    }

    fn load(&self) -> u8 {
        self.registers
            .get(usize::from(self.pointer))
            .copied()
            .unwrap_or(0xFF)
    }
}

/// Simulated chain of PCA9505 expanders on one I2C bus.
///
/// Absent addresses NACK. Present chips implement the register pointer
/// without auto-increment.
#[derive(Debug, Clone)]
pub struct MockExpanderBus {
    chips: Rc<RefCell<BTreeMap<u8, SimulatedExpander>>>,
    log: EventLog,
}

impl MockExpanderBus {
    /// Empty bus
    pub fn new(log: &EventLog) -> Self {
        Self {
            chips: Rc::new(RefCell::new(BTreeMap::new())),
            log: log.clone(),
        }
    }

    /// Bus with chips at `base + i` for each `i` in `indices`
    pub fn with_chips(base: u8, indices: &[u8], log: &EventLog) -> Self {
        let bus = Self::new(log);
        for index in indices {
            bus.add_chip(base.wrapping_add(*index));
        }
        bus
    }

    /// Attach a chip at `address`
    pub fn add_chip(&self, address: u8) {
        self.chips
            .borrow_mut()
            .insert(address, SimulatedExpander::new());
    }

    /// Make one configuration bank of the chip at `address` ignore writes
    pub fn set_stuck_config_bank(&self, address: u8, bank: u8) {
        if let Some(chip) = self.chips.borrow_mut().get_mut(&address) {
            chip.stuck_config_bank = Some(bank.min(BANKS_PER_CHIP.saturating_sub(1)));
        }
    }

    /// Make every write to `address` fail with a bus error
    pub fn set_fail_writes(&self, address: u8, fail: bool) {
        if let Some(chip) = self.chips.borrow_mut().get_mut(&address) {
            chip.fail_writes = fail;
        }
    }

    /// Raw register contents of a chip
    pub fn register(&self, address: u8, register: u8) -> Option<u8> {
        self.chips
            .borrow()
            .get(&address)
            .and_then(|chip| chip.registers.get(usize::from(register)).copied())
    }

    fn bus_write(&self, address: u8, bytes: &[u8]) -> Result<(), ErrorKind> {
        let mut chips = self.chips.borrow_mut();
        let Some(chip) = chips.get_mut(&address) else {
            self.log.push(HwEvent::I2cNack { address });
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        };
        self.log.push(HwEvent::I2cWrite {
            address,
            bytes: bytes.to_vec(),
        });
        if chip.fail_writes {
            return Err(ErrorKind::Bus);
        }
        if let Some((register, data)) = bytes.split_first() {
            chip.pointer = register & 0x7F;
            for value in data {
                chip.store(*value);
            }
        }
        Ok(())
    }

    fn bus_read(&self, address: u8, buffer: &mut [u8]) -> Result<(), ErrorKind> {
        let chips = self.chips.borrow();
        let Some(chip) = chips.get(&address) else {
            self.log.push(HwEvent::I2cNack { address });
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        };
        for byte in buffer.iter_mut() {
            *byte = chip.load();
            self.log.push(HwEvent::I2cRead {
                address,
                byte: *byte,
            });
        }
        Ok(())
    }
}

impl i2c::ErrorType for MockExpanderBus {
    type Error = ErrorKind;
}

impl I2c for MockExpanderBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        for operation in operations {
            match operation {
                i2c::Operation::Write(bytes) => self.bus_write(address, bytes)?,
                i2c::Operation::Read(buffer) => self.bus_read(address, buffer)?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Potentiometer SPI device
// ---------------------------------------------------------------------------

/// SPI device standing in for the digital potentiometer.
#[derive(Debug, Clone)]
pub struct MockPot {
    wiper: Rc<Cell<Option<u8>>>,
    fail: Rc<Cell<bool>>,
    writes_left: Rc<Cell<Option<u32>>>,
    log: EventLog,
}

impl MockPot {
    /// Create a pot that has never been written
    pub fn new(log: &EventLog) -> Self {
        Self {
            wiper: Rc::new(Cell::new(None)),
            fail: Rc::new(Cell::new(false)),
            writes_left: Rc::new(Cell::new(None)),
            log: log.clone(),
        }
    }

    /// Last wiper code written, if any
    pub fn wiper(&self) -> Option<u8> {
        self.wiper.get()
    }

    /// Make subsequent transactions fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.set(fail);
    }

    /// Let `writes` more transactions through, then fail every later one
    pub fn fail_after(&self, writes: u32) {
        self.writes_left.set(Some(writes));
    }
}

impl spi::ErrorType for MockPot {
    type Error = spi::ErrorKind;
}

impl SpiDevice for MockPot {
    fn transaction(&mut self, operations: &mut [spi::Operation<'_, u8>]) -> Result<(), Self::Error> {
        match self.writes_left.get() {
            Some(0) => self.fail.set(true),
            Some(n) => self.writes_left.set(Some(n.saturating_sub(1))),
            None => {}
        }
        if self.fail.get() {
            return Err(spi::ErrorKind::Other);
        }
        let mut frame = Vec::new();
        for operation in operations.iter() {
            if let spi::Operation::Write(bytes) = operation {
                frame.extend_from_slice(bytes);
            }
        }
        if let Some(code) = frame.get(1) {
            self.wiper.set(Some(*code));
        }
        self.log.push(HwEvent::PotWrite(frame));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timer and delay
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TimerState {
    period_us: Option<u32>,
    running: bool,
    restarts: u32,
    fail_programming: bool,
}

/// Injected [`MockTimer`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockTimerFault;

/// Periodic timer that records programming but never fires on its own.
#[derive(Debug, Clone)]
pub struct MockTimer {
    state: Rc<RefCell<TimerState>>,
    log: EventLog,
}

impl MockTimer {
    /// Stopped timer with no period
    pub fn new(log: &EventLog) -> Self {
        Self {
            state: Rc::new(RefCell::new(TimerState::default())),
            log: log.clone(),
        }
    }

    /// Programmed period
    pub fn period_us(&self) -> Option<u32> {
        self.state.borrow().period_us
    }

    /// Running flag
    pub fn running(&self) -> bool {
        self.state.borrow().running
    }

    /// Number of restarts so far
    pub fn restarts(&self) -> u32 {
        self.state.borrow().restarts
    }

    /// Make period programming and restarts fail. Stopping still works.
    pub fn set_fail_programming(&self, fail: bool) {
        self.state.borrow_mut().fail_programming = fail;
    }
}

impl PeriodicTimer for MockTimer {
    type Error = MockTimerFault;

    fn set_period_us(&mut self, period_us: u32) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_programming {
            return Err(MockTimerFault);
        }
        state.period_us = Some(period_us);
        self.log.push(HwEvent::TimerPeriod(period_us));
        Ok(())
    }

    fn restart(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_programming {
            return Err(MockTimerFault);
        }
        state.running = true;
        state.restarts = state.restarts.saturating_add(1);
        self.log.push(HwEvent::TimerRestart);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().running = false;
        self.log.push(HwEvent::TimerStop);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.borrow().running
    }
}

/// Delay that returns immediately and logs the requested duration.
#[derive(Debug, Clone)]
pub struct MockDelay {
    log: EventLog,
}

impl MockDelay {
    /// Create a delay logging into `log`
    pub fn new(log: &EventLog) -> Self {
        Self { log: log.clone() }
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.push(HwEvent::DelayUs(ns.div_ceil(1_000)));
    }

    fn delay_us(&mut self, us: u32) {
        self.log.push(HwEvent::DelayUs(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.push(HwEvent::DelayUs(ms.saturating_mul(1_000)));
    }
}

// ---------------------------------------------------------------------------
// Servo and PWM
// ---------------------------------------------------------------------------

/// Servo recording attach pin and angle.
#[derive(Debug, Clone)]
pub struct MockServo {
    pin: Rc<Cell<Option<u8>>>,
    angle: Rc<Cell<u8>>,
    log: EventLog,
}

impl MockServo {
    /// Detached servo at 0°
    pub fn new(log: &EventLog) -> Self {
        Self {
            pin: Rc::new(Cell::new(None)),
            angle: Rc::new(Cell::new(0)),
            log: log.clone(),
        }
    }
}

impl Servo for MockServo {
    type Error = Infallible;

    fn attach(&mut self, pin: u8) -> Result<(), Self::Error> {
        self.pin.set(Some(pin));
        self.log.push(HwEvent::ServoAttach(pin));
        Ok(())
    }

    fn write_angle(&mut self, degrees: u8) -> Result<(), Self::Error> {
        let degrees = degrees.min(MAX_ANGLE_DEGREES);
        self.angle.set(degrees);
        self.log.push(HwEvent::ServoAngle(degrees));
        Ok(())
    }

    fn angle(&self) -> u8 {
        self.angle.get()
    }

    fn attached_pin(&self) -> Option<u8> {
        self.pin.get()
    }
}

/// 8-bit PWM channel.
#[derive(Debug, Clone)]
pub struct MockPwm {
    duty: Rc<Cell<u16>>,
    log: EventLog,
}

impl MockPwm {
    /// Full-scale duty value
    pub const MAX_DUTY: u16 = 255;

    /// Channel at 0 % duty
    pub fn new(log: &EventLog) -> Self {
        Self {
            duty: Rc::new(Cell::new(0)),
            log: log.clone(),
        }
    }

    /// Current duty
    pub fn duty(&self) -> u16 {
        self.duty.get()
    }
}

impl pwm::ErrorType for MockPwm {
    type Error = Infallible;
}

impl SetDutyCycle for MockPwm {
    fn max_duty_cycle(&self) -> u16 {
        Self::MAX_DUTY
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duty.set(duty.min(Self::MAX_DUTY));
        self.log.push(HwEvent::LightDuty(duty));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EEPROM
// ---------------------------------------------------------------------------

/// Errors from [`MockEeprom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEepromError {
    /// Access past the end of the device
    OutOfBounds,
    /// Supply dropped during or before this write
    PowerLoss,
}

#[derive(Debug)]
struct EepromState {
    bytes: Vec<u8>,
    tear_after: Option<usize>,
    powered: bool,
    writes: u32,
}

/// Byte-addressed EEPROM with power-loss injection.
///
/// Starts erased (0xFF). After [`MockEeprom::lose_power_after`], the next
/// write stores only the first `n` bytes and every later write fails until
/// [`MockEeprom::restore_power`] simulates a reboot.
#[derive(Debug, Clone)]
pub struct MockEeprom {
    state: Rc<RefCell<EepromState>>,
}

impl MockEeprom {
    /// Erased device of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(EepromState {
                bytes: std::vec![0xFF; capacity],
                tear_after: None,
                powered: true,
                writes: 0,
            })),
        }
    }

    /// Tear the next write after `bytes` bytes and fail all later writes
    pub fn lose_power_after(&self, bytes: usize) {
        self.state.borrow_mut().tear_after = Some(bytes);
    }

    /// Power back on
    pub fn restore_power(&self) {
        let mut state = self.state.borrow_mut();
        state.powered = true;
        state.tear_after = None;
    }

    /// XOR one byte with 0xFF
    pub fn corrupt(&self, offset: usize) {
        if let Some(byte) = self.state.borrow_mut().bytes.get_mut(offset) {
            *byte ^= 0xFF;
        }
    }

    /// Copy of the raw contents
    pub fn contents(&self) -> Vec<u8> {
        self.state.borrow().bytes.clone()
    }

    /// Number of write calls that reached the device
    pub fn writes(&self) -> u32 {
        self.state.borrow().writes
    }
}

impl ReadStorage for MockEeprom {
    type Error = MockEepromError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let state = self.state.borrow();
        let start = usize::try_from(offset).map_err(|_| MockEepromError::OutOfBounds)?;
        let end = start
            .checked_add(bytes.len())
            .ok_or(MockEepromError::OutOfBounds)?;
        let source = state
            .bytes
            .get(start..end)
            .ok_or(MockEepromError::OutOfBounds)?;
        bytes.copy_from_slice(source);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.state.borrow().bytes.len()
    }
}

impl Storage for MockEeprom {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if !state.powered {
            return Err(MockEepromError::PowerLoss);
        }
        let start = usize::try_from(offset).map_err(|_| MockEepromError::OutOfBounds)?;
        let end = start
            .checked_add(bytes.len())
            .ok_or(MockEepromError::OutOfBounds)?;
        if end > state.bytes.len() {
            return Err(MockEepromError::OutOfBounds);
        }
        state.writes = state.writes.saturating_add(1);
        let (stored, torn) = match state.tear_after.take() {
            Some(limit) => (limit.min(bytes.len()), true),
            None => (bytes.len(), false),
        };
        let (head, _) = bytes.split_at(stored);
        if let Some(target) = state.bytes.get_mut(start..start.saturating_add(stored)) {
            target.copy_from_slice(head);
        }
        if torn {
            state.powered = false;
            return Err(MockEepromError::PowerLoss);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Board bundle
// ---------------------------------------------------------------------------

/// [`Board`] made entirely of mocks.
#[derive(Debug, Clone, Copy)]
pub struct MockBoard;

impl Board for MockBoard {
    type Bus = MockExpanderBus;
    type Pot = MockPot;
    type Control = MockPin;
    type Wave = MockPin;
    type Timer = MockTimer;
    type Delay = MockDelay;
    type Servo = MockServo;
    type Light = MockPwm;
    type Eeprom = MockEeprom;
}
