//! Shared mock rig for controller integration tests.

#![allow(dead_code)]

use firmware::persist::{SLOT_COUNT, SLOT_SIZE};
use firmware::{Controller, IrqContext, Parts, TickClock};
use platform::board::{BOOST_SHDN_PIN, HV_OUTPUT_SELECT_PIN, WAVEFORM_HIGH_PIN, WAVEFORM_LOW_PIN};
use platform::mocks::{
    EventLog, MockBoard, MockDelay, MockEeprom, MockExpanderBus, MockPin, MockPot, MockPwm, MockServo,
    MockTimer,
};
use platform::pca9505::DEFAULT_BASE_ADDRESS;

/// Core clock used by the rig's tick counter.
pub const CLOCK_HZ: u32 = 48_000_000;

/// Test-side clones of every mocked peripheral.
pub struct Rig {
    pub log: EventLog,
    pub bus: MockExpanderBus,
    pub pot: MockPot,
    pub shdn: MockPin,
    pub hv_select: MockPin,
    pub wave_high: MockPin,
    pub wave_low: MockPin,
    pub timer: MockTimer,
    pub servo: MockServo,
    pub light: MockPwm,
    pub eeprom: MockEeprom,
}

impl Rig {
    /// Board with expanders at the given chip indices and a blank EEPROM.
    pub fn with_chips(chips: &[u8]) -> Self {
        let log = EventLog::new();
        Self {
            bus: MockExpanderBus::with_chips(DEFAULT_BASE_ADDRESS, chips, &log),
            pot: MockPot::new(&log),
            shdn: MockPin::new(BOOST_SHDN_PIN, &log),
            hv_select: MockPin::new(HV_OUTPUT_SELECT_PIN, &log),
            wave_high: MockPin::new(WAVEFORM_HIGH_PIN, &log),
            wave_low: MockPin::new(WAVEFORM_LOW_PIN, &log),
            timer: MockTimer::new(&log),
            servo: MockServo::new(&log),
            light: MockPwm::new(&log),
            eeprom: MockEeprom::new(SLOT_SIZE * SLOT_COUNT),
            log,
        }
    }

    /// Board with a single expander at the default address.
    pub fn new() -> Self {
        Self::with_chips(&[0])
    }

    /// Fresh controller over clones of the rig's peripherals.
    pub fn controller<'a>(&self, irq: &'a IrqContext<MockPin>) -> Controller<'a, MockBoard> {
        Controller::new(Parts {
            bus: self.bus.clone(),
            bus_delay: MockDelay::new(&self.log),
            pot: self.pot.clone(),
            boost_shdn: self.shdn.clone(),
            hv_select: self.hv_select.clone(),
            wave_high: self.wave_high.clone(),
            wave_low: self.wave_low.clone(),
            timer: self.timer.clone(),
            hv_delay: MockDelay::new(&self.log),
            servo: self.servo.clone(),
            light: self.light.clone(),
            eeprom: self.eeprom.clone(),
            irq,
            clock: TickClock::from_clock_hz(CLOCK_HZ),
            uuid: [0xA5; 16],
        })
    }
}
