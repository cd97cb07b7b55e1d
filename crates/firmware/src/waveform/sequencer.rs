//! Boost stage enable sequencing typestate machine.
//!
//! Enforces the start-up ordering of the high-voltage boost converter:
//!
//! ```text
//! [BoostOff] --ramp_to_safe_voltage()--> [AtSafeVoltage] --assert_enable()--> [BoostRunning]
//!     --restore_setpoint()--> [SetpointRestored]
//! ```
//!
//! The boost controller can fail to start when enabled against a high
//! feedback target, so the potentiometer is parked at the safe start-up
//! voltage before SHDN is released. Each transition performs its hardware
//! action and settle delay itself; skipping a step is a compile error.

use core::marker::PhantomData;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use platform::mcp41050::mcp41050_write_wiper;

use super::{BusFault, WaveformError};

/// Voltage the boost stage is started at.
pub const SAFE_STARTUP_VOLTAGE: f32 = 15.0;

/// Settle time after each sequencing step.
pub const BOOST_SETTLE_MS: u32 = 100;

// ── State types (zero-sized) ──────────────────────────────────────────────────

/// Boost disabled (SHDN high). Starting state.
pub struct BoostOff;

/// Potentiometer at the safe start-up setting; boost still disabled.
pub struct AtSafeVoltage;

/// Boost enabled (SHDN low) and settled at the safe voltage.
pub struct BoostRunning;

/// Requested voltage written back; ready for the waveform timer.
pub struct SetpointRestored;

// ── Sequencer ────────────────────────────────────────────────────────────────

/// Typestate machine for boost enable.
pub struct BoostSequencer<State> {
    _state: PhantomData<State>,
}

impl BoostSequencer<BoostOff> {
    /// Begin a start-up sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _state: PhantomData,
        }
    }

    /// Write the safe-voltage wiper code and wait for the output to settle.
    pub fn ramp_to_safe_voltage<P, D>(
        self,
        pot: &mut P,
        safe_code: u8,
        delay: &mut D,
    ) -> Result<BoostSequencer<AtSafeVoltage>, WaveformError>
    where
        P: SpiDevice,
        D: DelayNs,
    {
        mcp41050_write_wiper(pot, safe_code)
            .map_err(|_| WaveformError::Bus(BusFault::Potentiometer))?;
        delay.delay_ms(BOOST_SETTLE_MS);
        Ok(BoostSequencer {
            _state: PhantomData,
        })
    }
}

impl Default for BoostSequencer<BoostOff> {
    fn default() -> Self {
        Self::new()
    }
}

impl BoostSequencer<AtSafeVoltage> {
    /// Release SHDN (drive low) and wait for the converter to start.
    ///
    /// Safe only after `ramp_to_safe_voltage()`.
    pub fn assert_enable<C, D>(
        self,
        shdn: &mut C,
        delay: &mut D,
    ) -> Result<BoostSequencer<BoostRunning>, WaveformError>
    where
        C: OutputPin,
        D: DelayNs,
    {
        shdn.set_low()
            .map_err(|_| WaveformError::Bus(BusFault::ControlLine))?;
        delay.delay_ms(BOOST_SETTLE_MS);
        Ok(BoostSequencer {
            _state: PhantomData,
        })
    }
}

impl BoostSequencer<BoostRunning> {
    /// Write the requested voltage's wiper code.
    pub fn restore_setpoint<P>(
        self,
        pot: &mut P,
        code: u8,
    ) -> Result<BoostSequencer<SetpointRestored>, WaveformError>
    where
        P: SpiDevice,
    {
        mcp41050_write_wiper(pot, code)
            .map_err(|_| WaveformError::Bus(BusFault::Potentiometer))?;
        Ok(BoostSequencer {
            _state: PhantomData,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use platform::mocks::{EventLog, HwEvent, MockDelay, MockPin, MockPot};

    #[test]
    fn full_sequence_orders_pot_shdn_pot() {
        let log = EventLog::new();
        let mut pot = MockPot::new(&log);
        let mut shdn = MockPin::new(4, &log);
        let mut delay = MockDelay::new(&log);

        let _restored = BoostSequencer::new()
            .ramp_to_safe_voltage(&mut pot, 0x4A, &mut delay)
            .unwrap()
            .assert_enable(&mut shdn, &mut delay)
            .unwrap()
            .restore_setpoint(&mut pot, 0xF3)
            .unwrap();

        assert_eq!(
            log.events(),
            std::vec![
                HwEvent::PotWrite(std::vec![0x1F, 0x4A]),
                HwEvent::DelayUs(100_000),
                HwEvent::PinLow(4),
                HwEvent::DelayUs(100_000),
                HwEvent::PotWrite(std::vec![0x1F, 0xF3]),
            ]
        );
    }

    #[test]
    fn pot_failure_stops_before_enable() {
        let log = EventLog::new();
        let mut pot = MockPot::new(&log);
        pot.set_fail(true);
        let mut delay = MockDelay::new(&log);

        let result = BoostSequencer::new().ramp_to_safe_voltage(&mut pot, 0x4A, &mut delay);

        assert!(matches!(
            result,
            Err(WaveformError::Bus(BusFault::Potentiometer))
        ));
        assert!(log.events().is_empty());
    }
}
