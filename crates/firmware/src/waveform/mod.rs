//! High-voltage waveform and actuation voltage control
//!
//! The boost converter's output voltage is set through the MCP41050 digital
//! potentiometer in its feedback network; the H-bridge legs are toggled by
//! the waveform timer interrupt (see [`crate::irq`]) to produce a square wave
//! whose half-period encodes the requested frequency.
//!
//! ```text
//! set_voltage(v)    → wiper code → pot write (or reject, no bus traffic)
//! set_frequency(f)  → f == 0 : timer stop, legs forced to DC
//!                     f  > 0 : timer period 500000/f µs, restart
//! enable_output()   → BoostSequencer: 15 V → SHDN low → setpoint → timer
//! disable_output()  → SHDN high, timer stop
//! ```

pub mod sequencer;

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{OutputPin, PinState, StatefulOutputPin};
use embedded_hal::spi::SpiDevice;
use platform::board::{FEEDBACK_REFERENCE_VOLTS, R6_OHMS};
use platform::mcp41050::{mcp41050_write_wiper, WIPER_MAX};
use platform::timer::PeriodicTimer;

use crate::irq::IrqContext;

pub use sequencer::{BoostSequencer, BOOST_SETTLE_MS, SAFE_STARTUP_VOLTAGE};

/// Half-period numerator: 10⁶ µs/s over two half-cycles.
pub const HALF_PERIOD_NUMERATOR_US: f32 = 500_000.0;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Peripheral that failed during a waveform operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFault {
    /// SPI transaction to the digital potentiometer
    Potentiometer,
    /// Boost SHDN or HV output select line
    ControlLine,
    /// Waveform timer programming
    Timer,
    /// H-bridge leg pins
    WavePins,
}

/// Waveform request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaveformError {
    /// Voltage above `max_voltage` or outside the potentiometer's range
    VoltageOutOfRange,
    /// Frequency outside `[min_frequency, max_frequency]`
    FrequencyOutOfRange,
    /// A peripheral access failed part-way
    Bus(BusFault),
}

impl fmt::Display for WaveformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VoltageOutOfRange => write!(f, "voltage out of range"),
            Self::FrequencyOutOfRange => write!(f, "frequency out of range"),
            Self::Bus(BusFault::Potentiometer) => write!(f, "potentiometer write failed"),
            Self::Bus(BusFault::ControlLine) => write!(f, "control line write failed"),
            Self::Bus(BusFault::Timer) => write!(f, "waveform timer failed"),
            Self::Bus(BusFault::WavePins) => write!(f, "waveform pin write failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WaveformError {}

// ── Pure conversions ─────────────────────────────────────────────────────────

/// Calibration of the potentiometer feedback network.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PotCalibration {
    /// Highest accepted output voltage (V)
    pub max_voltage: f32,
    /// Potentiometer full-scale resistance (Ω)
    pub pot_max: f32,
    /// Series resistor R7 (Ω)
    pub series_ohms: f32,
}

impl PotCalibration {
    /// Potentiometer resistance that produces `volts` at the boost output.
    ///
    /// `R = R6 / (2v / 1.5 - 1) - R7`. Negative or non-finite results mean
    /// the voltage is unreachable.
    pub fn potentiometer_ohms(&self, volts: f32) -> f32 {
        R6_OHMS / (2.0 * volts / FEEDBACK_REFERENCE_VOLTS - 1.0) - self.series_ohms
    }

    /// Wiper code for `volts`, or [`WaveformError::VoltageOutOfRange`].
    pub fn wiper_code(&self, volts: f32) -> Result<u8, WaveformError> {
        if volts.is_nan() || volts > self.max_voltage {
            return Err(WaveformError::VoltageOutOfRange);
        }
        let ohms = self.potentiometer_ohms(volts);
        if !(0.0..=self.pot_max).contains(&ohms) {
            return Err(WaveformError::VoltageOutOfRange);
        }
        let full_scale = f32::from(WIPER_MAX);
        let code = full_scale - ohms / self.pot_max * full_scale;
        // Truncation is the wiper quantisation; code is within 0..=255 here.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let code = code as u8;
        Ok(code)
    }

    /// Lowest voltage reachable with the potentiometer at full scale.
    pub fn min_waveform_voltage(&self) -> f32 {
        FEEDBACK_REFERENCE_VOLTS / 2.0 * (R6_OHMS / (self.pot_max + self.series_ohms) + 1.0)
    }
}

/// Accepted waveform frequency range (Hz, inclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrequencyLimits {
    /// Lowest accepted frequency
    pub min: f32,
    /// Highest accepted frequency
    pub max: f32,
}

impl FrequencyLimits {
    /// Whether `frequency` lies in `[min, max]`. NaN is never accepted.
    pub fn contains(&self, frequency: f32) -> bool {
        (self.min..=self.max).contains(&frequency)
    }
}

/// Timer programming for a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalfPeriod {
    /// Static output, timer stopped
    Dc,
    /// Toggle every this many microseconds
    Micros(u32),
}

/// Half-period for `frequency`: `500000 / f` µs, or DC at 0 Hz.
pub fn half_period(frequency: f32) -> HalfPeriod {
    if frequency == 0.0 {
        return HalfPeriod::Dc;
    }
    // Saturating float→int cast; callers range-check the frequency first.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let micros = (HALF_PERIOD_NUMERATOR_US / frequency) as u32;
    HalfPeriod::Micros(micros)
}

// ── Square wave legs ─────────────────────────────────────────────────────────

/// The two H-bridge legs driven in antiphase.
///
/// Owned by the interrupt context so the timer handler can toggle them.
pub struct SquareWave<W> {
    high: W,
    low: W,
}

impl<W: StatefulOutputPin> SquareWave<W> {
    /// Wrap the HIGH and LOW leg pins.
    pub fn new(high: W, low: W) -> Self {
        Self { high, low }
    }

    /// Flip both legs, turning the conducting leg off before the other on.
    pub fn toggle(&mut self) -> Result<(), W::Error> {
        if self.high.is_set_high()? {
            self.high.set_low()?;
            self.low.set_high()
        } else {
            self.low.set_low()?;
            self.high.set_high()
        }
    }

    /// Static DC: HIGH leg on, LOW leg off.
    pub fn force_dc(&mut self) -> Result<(), W::Error> {
        self.low.set_low()?;
        self.high.set_high()
    }

    /// Give the pins back.
    pub fn release(self) -> (W, W) {
        (self.high, self.low)
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

/// Drives the potentiometer, boost SHDN line, HV output select line and the
/// waveform timer.
pub struct WaveformController<'a, P, C, W, T, D> {
    pot: P,
    shdn: C,
    hv_select: C,
    timer: T,
    delay: D,
    irq: &'a IrqContext<W>,
    boost_enabled: bool,
}

impl<'a, P, C, W, T, D> WaveformController<'a, P, C, W, T, D>
where
    P: SpiDevice,
    C: OutputPin,
    W: StatefulOutputPin,
    T: PeriodicTimer,
    D: DelayNs,
{
    /// Take ownership of the analog front-end peripherals.
    ///
    /// The waveform legs live in `irq`; install them there before the timer
    /// is started.
    pub fn new(pot: P, shdn: C, hv_select: C, timer: T, delay: D, irq: &'a IrqContext<W>) -> Self {
        Self {
            pot,
            shdn,
            hv_select,
            timer,
            delay,
            irq,
            boost_enabled: false,
        }
    }

    /// Put the front-end in its safe state: boost off, timer stopped.
    pub fn init(&mut self) -> Result<(), WaveformError> {
        self.timer
            .stop()
            .map_err(|_| WaveformError::Bus(BusFault::Timer))?;
        self.shdn
            .set_high()
            .map_err(|_| WaveformError::Bus(BusFault::ControlLine))?;
        self.boost_enabled = false;
        Ok(())
    }

    /// Write the wiper code for `volts`. Rejected voltages cause no bus
    /// traffic.
    pub fn set_voltage(&mut self, volts: f32, calibration: &PotCalibration) -> Result<(), WaveformError> {
        let code = calibration.wiper_code(volts)?;
        mcp41050_write_wiper(&mut self.pot, code)
            .map_err(|_| WaveformError::Bus(BusFault::Potentiometer))?;
        log_trace!("wiper code {}", code);
        Ok(())
    }

    /// Program the waveform timer for `frequency`.
    ///
    /// At 0 Hz the timer is stopped before the legs are forced to DC so no
    /// tick can race the static level.
    pub fn set_frequency(
        &mut self,
        frequency: f32,
        limits: &FrequencyLimits,
    ) -> Result<HalfPeriod, WaveformError> {
        if !limits.contains(frequency) {
            return Err(WaveformError::FrequencyOutOfRange);
        }
        let period = half_period(frequency);
        match period {
            HalfPeriod::Dc => {
                self.timer
                    .stop()
                    .map_err(|_| WaveformError::Bus(BusFault::Timer))?;
                match self.irq.with_wave(SquareWave::force_dc) {
                    Some(Err(_)) => return Err(WaveformError::Bus(BusFault::WavePins)),
                    Some(Ok(())) => {}
                    None => log_warn!("waveform legs not installed"),
                }
            }
            HalfPeriod::Micros(us) => {
                self.timer
                    .set_period_us(us)
                    .map_err(|_| WaveformError::Bus(BusFault::Timer))?;
                self.timer
                    .restart()
                    .map_err(|_| WaveformError::Bus(BusFault::Timer))?;
            }
        }
        Ok(period)
    }

    /// Start the boost stage and the waveform at the requested setpoint.
    ///
    /// Every input is checked before the first hardware access, so a
    /// rejected request leaves the front-end untouched. Runs the full
    /// sequence even if the boost is already enabled. A peripheral failure
    /// part-way through shuts the boost down again before returning.
    pub fn enable_output(
        &mut self,
        volts: f32,
        frequency: f32,
        calibration: &PotCalibration,
        limits: &FrequencyLimits,
    ) -> Result<(), WaveformError> {
        let safe_code = calibration.wiper_code(SAFE_STARTUP_VOLTAGE)?;
        let code = calibration.wiper_code(volts)?;
        if !limits.contains(frequency) {
            return Err(WaveformError::FrequencyOutOfRange);
        }

        if let Err(e) = self.start_boost(safe_code, code, frequency, limits) {
            log_error!("HV enable failed: {}", e);
            self.shutdown();
            return Err(e);
        }
        log_info!("HV output enabled");
        Ok(())
    }

    fn start_boost(
        &mut self,
        safe_code: u8,
        code: u8,
        frequency: f32,
        limits: &FrequencyLimits,
    ) -> Result<(), WaveformError> {
        let _restored = BoostSequencer::new()
            .ramp_to_safe_voltage(&mut self.pot, safe_code, &mut self.delay)?
            .assert_enable(&mut self.shdn, &mut self.delay)?
            .restore_setpoint(&mut self.pot, code)?;
        self.boost_enabled = true;
        self.set_frequency(frequency, limits)?;
        Ok(())
    }

    /// Best-effort shutdown after a failed enable: SHDN high, timer stopped.
    fn shutdown(&mut self) {
        if self.shdn.set_high().is_err() {
            log_error!("boost SHDN could not be asserted");
        }
        if self.timer.stop().is_err() {
            log_error!("waveform timer could not be stopped");
        }
        self.boost_enabled = false;
    }

    /// Shut the boost stage down and stop the waveform. No ramp-down.
    pub fn disable_output(&mut self) -> Result<(), WaveformError> {
        self.shdn
            .set_high()
            .map_err(|_| WaveformError::Bus(BusFault::ControlLine))?;
        self.boost_enabled = false;
        self.timer
            .stop()
            .map_err(|_| WaveformError::Bus(BusFault::Timer))?;
        log_info!("HV output disabled");
        Ok(())
    }

    /// Route the HV path. The select line is active low.
    pub fn select_output(&mut self, selected: bool) -> Result<(), WaveformError> {
        self.hv_select
            .set_state(PinState::from(!selected))
            .map_err(|_| WaveformError::Bus(BusFault::ControlLine))
    }

    /// Whether SHDN was last released by [`enable_output`](Self::enable_output).
    pub fn is_boost_enabled(&self) -> bool {
        self.boost_enabled
    }

    /// Whether the waveform timer is running.
    pub fn is_timer_running(&self) -> bool {
        self.timer.is_running()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use platform::board::{BOOST_SHDN_PIN, HV_OUTPUT_SELECT_PIN, WAVEFORM_HIGH_PIN, WAVEFORM_LOW_PIN};
    use platform::mocks::{EventLog, HwEvent, MockDelay, MockPin, MockPot, MockTimer};

    const CALIBRATION: PotCalibration = PotCalibration {
        max_voltage: 200.0,
        pot_max: 50_000.0,
        series_ohms: 1_000.0,
    };

    const LIMITS: FrequencyLimits = FrequencyLimits {
        min: 0.0,
        max: 10_000.0,
    };

    struct Rig {
        log: EventLog,
        pot: MockPot,
        timer: MockTimer,
        high: MockPin,
        low: MockPin,
        shdn: MockPin,
        select: MockPin,
    }

    impl Rig {
        fn new() -> Self {
            let log = EventLog::new();
            Self {
                pot: MockPot::new(&log),
                timer: MockTimer::new(&log),
                high: MockPin::new(WAVEFORM_HIGH_PIN, &log),
                low: MockPin::new(WAVEFORM_LOW_PIN, &log),
                shdn: MockPin::new(BOOST_SHDN_PIN, &log),
                select: MockPin::new(HV_OUTPUT_SELECT_PIN, &log),
                log,
            }
        }

        fn controller<'a>(
            &self,
            irq: &'a IrqContext<MockPin>,
        ) -> WaveformController<'a, MockPot, MockPin, MockPin, MockTimer, MockDelay> {
            irq.install_wave(SquareWave::new(self.high.clone(), self.low.clone()));
            WaveformController::new(
                self.pot.clone(),
                self.shdn.clone(),
                self.select.clone(),
                self.timer.clone(),
                MockDelay::new(&self.log),
                irq,
            )
        }
    }

    #[test]
    fn wiper_code_for_known_setpoints() {
        // 150 V → R ≈ 2417 Ω → 255 - 12.3 = 242
        assert_eq!(CALIBRATION.wiper_code(150.0), Ok(242));
        // 15 V → R ≈ 34789 Ω → 255 - 177.4 = 77
        assert_eq!(CALIBRATION.wiper_code(SAFE_STARTUP_VOLTAGE), Ok(77));
    }

    #[test]
    fn unreachable_voltages_are_rejected() {
        assert_eq!(
            CALIBRATION.wiper_code(201.0),
            Err(WaveformError::VoltageOutOfRange)
        );
        // Below the minimum waveform voltage the pot would exceed full scale.
        assert!(CALIBRATION.wiper_code(5.0).is_err());
        // 0.75 V divides by zero; 0 V goes negative.
        assert!(CALIBRATION.wiper_code(0.75).is_err());
        assert!(CALIBRATION.wiper_code(0.0).is_err());
        assert!(CALIBRATION.wiper_code(f32::NAN).is_err());
    }

    #[test]
    fn min_waveform_voltage_matches_full_scale() {
        let v = CALIBRATION.min_waveform_voltage();
        assert!((v - 10.75).abs() < 1e-3);
        let ohms = CALIBRATION.potentiometer_ohms(v);
        assert!((ohms - CALIBRATION.pot_max).abs() < 1.0);
    }

    #[test]
    fn half_period_of_known_frequencies() {
        assert_eq!(half_period(0.0), HalfPeriod::Dc);
        assert_eq!(half_period(10.0), HalfPeriod::Micros(50_000));
        assert_eq!(half_period(10_000.0), HalfPeriod::Micros(50));
    }

    #[test]
    fn rejected_voltage_leaves_pot_untouched() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);

        assert!(ctl.set_voltage(500.0, &CALIBRATION).is_err());
        assert!(rig.log.events().is_empty());
        assert_eq!(rig.pot.wiper(), None);
    }

    #[test]
    fn zero_hz_stops_timer_then_forces_dc() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);
        ctl.set_frequency(100.0, &LIMITS).unwrap();
        rig.log.clear();

        assert_eq!(ctl.set_frequency(0.0, &LIMITS), Ok(HalfPeriod::Dc));

        assert_eq!(
            rig.log.events(),
            std::vec![
                HwEvent::TimerStop,
                HwEvent::PinLow(WAVEFORM_LOW_PIN),
                HwEvent::PinHigh(WAVEFORM_HIGH_PIN),
            ]
        );
        assert!(!rig.timer.running());
        assert!(rig.high.is_high());
        assert!(!rig.low.is_high());
    }

    #[test]
    fn frequency_outside_limits_is_rejected() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);
        assert_eq!(
            ctl.set_frequency(20_000.0, &LIMITS),
            Err(WaveformError::FrequencyOutOfRange)
        );
        assert!(ctl.set_frequency(-1.0, &LIMITS).is_err());
        assert!(rig.log.events().is_empty());
    }

    #[test]
    fn enable_sequences_boost_then_starts_timer() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);

        ctl.enable_output(150.0, 10.0, &CALIBRATION, &LIMITS).unwrap();

        assert_eq!(
            rig.log.events(),
            std::vec![
                HwEvent::PotWrite(std::vec![0x1F, 77]),
                HwEvent::DelayUs(100_000),
                HwEvent::PinLow(BOOST_SHDN_PIN),
                HwEvent::DelayUs(100_000),
                HwEvent::PotWrite(std::vec![0x1F, 242]),
                HwEvent::TimerPeriod(50_000),
                HwEvent::TimerRestart,
            ]
        );
        assert!(ctl.is_boost_enabled());
        assert!(ctl.is_timer_running());
    }

    #[test]
    fn enable_rejects_bad_setpoint_before_touching_hardware() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);

        assert!(ctl.enable_output(150.0, 50_000.0, &CALIBRATION, &LIMITS).is_err());
        assert!(ctl.enable_output(300.0, 10.0, &CALIBRATION, &LIMITS).is_err());
        assert!(rig.log.events().is_empty());
        assert!(!ctl.is_boost_enabled());
    }

    #[test]
    fn failed_timer_programming_shuts_boost_down() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);
        rig.timer.set_fail_programming(true);

        let result = ctl.enable_output(100.0, 1_000.0, &CALIBRATION, &LIMITS);

        assert_eq!(result, Err(WaveformError::Bus(BusFault::Timer)));
        assert!(!ctl.is_boost_enabled());
        assert!(rig.shdn.is_high());
        assert!(!rig.timer.running());
        assert_eq!(rig.log.events().last(), Some(&HwEvent::TimerStop));
    }

    #[test]
    fn failed_setpoint_write_shuts_boost_down() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);
        // Safe-voltage write goes through, the setpoint write fails.
        rig.pot.fail_after(1);

        let result = ctl.enable_output(100.0, 1_000.0, &CALIBRATION, &LIMITS);

        assert_eq!(result, Err(WaveformError::Bus(BusFault::Potentiometer)));
        assert_eq!(
            rig.log.events(),
            std::vec![
                HwEvent::PotWrite(std::vec![0x1F, 77]),
                HwEvent::DelayUs(100_000),
                HwEvent::PinLow(BOOST_SHDN_PIN),
                HwEvent::DelayUs(100_000),
                HwEvent::PinHigh(BOOST_SHDN_PIN),
                HwEvent::TimerStop,
            ]
        );
        assert!(!ctl.is_boost_enabled());
        assert!(rig.shdn.is_high());
    }

    #[test]
    fn disable_releases_boost_and_stops_timer() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);
        ctl.enable_output(100.0, 1_000.0, &CALIBRATION, &LIMITS).unwrap();
        rig.log.clear();

        ctl.disable_output().unwrap();

        assert_eq!(
            rig.log.events(),
            std::vec![HwEvent::PinHigh(BOOST_SHDN_PIN), HwEvent::TimerStop]
        );
        assert!(!ctl.is_boost_enabled());
    }

    #[test]
    fn output_select_is_active_low() {
        let rig = Rig::new();
        let irq = IrqContext::new();
        let mut ctl = rig.controller(&irq);
        ctl.select_output(true).unwrap();
        assert!(!rig.select.is_high());
        ctl.select_output(false).unwrap();
        assert!(rig.select.is_high());
    }

    #[test]
    fn toggle_breaks_before_make() {
        let log = EventLog::new();
        let mut wave = SquareWave::new(
            MockPin::new(WAVEFORM_HIGH_PIN, &log),
            MockPin::new(WAVEFORM_LOW_PIN, &log),
        );
        wave.toggle().unwrap();
        wave.toggle().unwrap();
        assert_eq!(
            log.events(),
            std::vec![
                HwEvent::PinLow(WAVEFORM_LOW_PIN),
                HwEvent::PinHigh(WAVEFORM_HIGH_PIN),
                HwEvent::PinLow(WAVEFORM_HIGH_PIN),
                HwEvent::PinHigh(WAVEFORM_LOW_PIN),
            ]
        );
    }
}
