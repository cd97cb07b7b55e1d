//! Device context: Config, State and the hardware their handlers drive.
//!
//! [`Controller`] is constructed once from the board's [`Parts`] and is the
//! single entry point for the command surface. Every mutation goes through
//! the property stores, whose change hooks call into the switching fabric,
//! the waveform controller, the servo and the light.
//!
//! ```text
//! set_state(field, v) ─► PropertyStore::set ─► StateHooks ─► WaveformController
//!                                                       └──► Servo / Light
//! set_config(field, v) ─► Config::set (persist) ─► ConfigHooks ─► SwitchingFabric
//!                                                              └─► Servo / Light
//! ```

use embedded_hal::pwm::SetDutyCycle;
use platform::board::Board;
use platform::config::{device_id_response, APP_NAME, APP_VERSION, HARDWARE_VERSION, UUID_LEN};
use platform::pca9505::DEFAULT_BASE_ADDRESS;
use platform::servo::Servo;

use crate::config::{validate_config_field, Config, ConfigError, ConfigField};
use crate::fabric::{DiscoveryReport, FabricError, SwitchingFabric};
use crate::irq::{IrqContext, SamplingDone};
use crate::persist::{LoadStatus, PersistError};
use crate::property::{FieldHooks, FieldSet, PropertyError, PropertyStore, ValidationReport, Value};
use crate::state::{validate_state_field, StateField};
use crate::timestamp::{CounterSample, TickClock};
use crate::waveform::{SquareWave, WaveformController};

/// Ordered boot steps performed by [`Controller::begin`].
///
/// # Correctness Invariants
///
/// - The waveform timer is stopped and the boost held in shutdown before any
///   State handler runs, so a stale timer cannot toggle the bridge while the
///   potentiometer is being programmed.
/// - The servo is attached before State validation so the magnet handler has
///   a pin to drive.
/// - State validation runs exactly once, after Config is loaded, so every
///   handler sees the persisted limits.
pub const BOOT_SEQUENCE_STEPS: &[&str] = &[
    "1. Waveform: stop timer, boost SHDN high",
    "2. Config: load newest valid slot, defaults otherwise",
    "3. State: reset to defaults, mark every field present",
    "4. Config side effects: fabric base address, servo attach, light",
    "5. State: validate (each handler runs once with its value)",
    "6. Fabric: discovery",
];

/// Peripherals and context handed to [`Controller::new`].
pub struct Parts<'a, B: Board> {
    /// Expander chain bus
    pub bus: B::Bus,
    /// Delay used for bus settle times
    pub bus_delay: B::Delay,
    /// Digital potentiometer
    pub pot: B::Pot,
    /// Boost converter SHDN line
    pub boost_shdn: B::Control,
    /// HV output select line
    pub hv_select: B::Control,
    /// Waveform HIGH leg
    pub wave_high: B::Wave,
    /// Waveform LOW leg
    pub wave_low: B::Wave,
    /// Waveform timer
    pub timer: B::Timer,
    /// Delay used for boost settle times
    pub hv_delay: B::Delay,
    /// Magnet servo
    pub servo: B::Servo,
    /// Light PWM channel
    pub light: B::Light,
    /// Config storage
    pub eeprom: B::Eeprom,
    /// Interrupt hand-off shared with the board's handlers
    pub irq: &'a IrqContext<B::Wave>,
    /// Tick counter geometry for sampling timestamps
    pub clock: TickClock,
    /// Unique device identifier read from the MCU
    pub uuid: [u8; UUID_LEN],
}

/// Boot outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootReport {
    /// How Config was obtained
    pub config: LoadStatus,
    /// State validation pass
    pub state: ValidationReport,
    /// Expander discovery
    pub discovery: DiscoveryReport,
}

/// PWM duty for a light intensity in `0..=1`.
pub fn light_duty(intensity: f32, max_duty: u16) -> u16 {
    let duty = intensity.clamp(0.0, 1.0) * f32::from(max_duty);
    // NaN maps to 0; the clamp bounds everything else to max_duty.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let duty = duty as u16;
    duty.min(max_duty)
}

struct Hardware<'a, B: Board> {
    fabric: SwitchingFabric<B::Bus, B::Delay>,
    waveform: WaveformController<'a, B::Pot, B::Control, B::Wave, B::Timer, B::Delay>,
    servo: B::Servo,
    light: B::Light,
}

impl<B: Board> Hardware<'_, B> {
    fn apply_light(&mut self, on: bool, intensity: f32) -> bool {
        let duty = if on {
            light_duty(intensity, self.light.max_duty_cycle())
        } else {
            0
        };
        self.light.set_duty_cycle(duty).is_ok()
    }

    fn attach_servo(&mut self, pin: u8) -> bool {
        self.servo.attach(pin).is_ok()
    }

    fn move_magnet(&mut self, degrees: u8) -> bool {
        self.servo.write_angle(degrees).is_ok()
    }
}

/// State rules plus hardware side effects.
struct StateHooks<'h, 'a, B: Board> {
    config: &'h PropertyStore<ConfigField>,
    hw: &'h mut Hardware<'a, B>,
}

impl<B: Board> FieldHooks<StateField> for StateHooks<'_, '_, B> {
    fn validate(&self, field: StateField, value: &Value, _: &PropertyStore<StateField>) -> bool {
        validate_state_field(field, value, self.config)
    }

    fn on_change(&mut self, field: StateField, state: &PropertyStore<StateField>) -> bool {
        let config = self.config;
        let waveform = &mut self.hw.waveform;
        let outcome = match field {
            StateField::Voltage => waveform.set_voltage(state.voltage(), &config.calibration()),
            StateField::Frequency => waveform
                .set_frequency(state.frequency(), &config.frequency_limits())
                .map(|_| ()),
            StateField::HvOutputEnabled if state.hv_output_enabled() => waveform.enable_output(
                state.voltage(),
                state.frequency(),
                &config.calibration(),
                &config.frequency_limits(),
            ),
            StateField::HvOutputEnabled => waveform.disable_output(),
            StateField::HvOutputSelected => waveform.select_output(state.hv_output_selected()),
            StateField::MagnetEngaged => {
                return self
                    .hw
                    .move_magnet(config.magnet_angle(state.magnet_engaged()));
            }
            StateField::LightEnabled => {
                return self
                    .hw
                    .apply_light(state.light_enabled(), config.light_intensity());
            }
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                log_warn!("{} not applied: {}", field.name(), e);
                false
            }
        }
    }
}

/// Config rules plus hardware side effects.
struct ConfigHooks<'h, 'a, B: Board> {
    state: &'h PropertyStore<StateField>,
    hw: &'h mut Hardware<'a, B>,
}

impl<B: Board> FieldHooks<ConfigField> for ConfigHooks<'_, '_, B> {
    fn validate(&self, field: ConfigField, value: &Value, config: &PropertyStore<ConfigField>) -> bool {
        validate_config_field(field, value, config)
    }

    fn on_change(&mut self, field: ConfigField, config: &PropertyStore<ConfigField>) -> bool {
        match field {
            ConfigField::SwitchingBoardI2cAddress => {
                self.hw
                    .fabric
                    .set_base_address(config.switching_board_i2c_address());
                true
            }
            ConfigField::LightIntensity => {
                !self.state.light_enabled() || self.hw.apply_light(true, config.light_intensity())
            }
            ConfigField::ServoPin => self.hw.attach_servo(config.servo_pin()),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SamplingStatus {
    channel: Option<u8>,
    sample: Option<CounterSample>,
    period_us: Option<u32>,
    timestamp_us: Option<u64>,
}

/// The controller device context.
pub struct Controller<'a, B: Board> {
    config: Config<B::Eeprom>,
    state: PropertyStore<StateField>,
    hw: Hardware<'a, B>,
    irq: &'a IrqContext<B::Wave>,
    clock: TickClock,
    uuid: [u8; UUID_LEN],
    sampling: SamplingStatus,
}

impl<'a, B: Board> Controller<'a, B> {
    /// Assemble the device context and hand the waveform legs to `irq`.
    ///
    /// Nothing is driven until [`begin`](Self::begin).
    pub fn new(parts: Parts<'a, B>) -> Self {
        let Parts {
            bus,
            bus_delay,
            pot,
            boost_shdn,
            hv_select,
            wave_high,
            wave_low,
            timer,
            hv_delay,
            servo,
            light,
            eeprom,
            irq,
            clock,
            uuid,
        } = parts;

        irq.install_wave(SquareWave::new(wave_high, wave_low));

        Self {
            config: Config::new(eeprom),
            state: PropertyStore::new(),
            hw: Hardware {
                fabric: SwitchingFabric::new(bus, bus_delay, DEFAULT_BASE_ADDRESS),
                waveform: WaveformController::new(pot, boost_shdn, hv_select, timer, hv_delay, irq),
                servo,
                light,
            },
            irq,
            clock,
            uuid,
            sampling: SamplingStatus::default(),
        }
    }

    /// Run the boot sequence (see [`BOOT_SEQUENCE_STEPS`]).
    pub fn begin(&mut self) -> BootReport {
        log_info!("{} {} starting", APP_NAME, APP_VERSION);

        if let Err(e) = self.hw.waveform.init() {
            log_error!("waveform init failed: {}", e);
        }

        let config = self.config.load();
        if !config.is_loaded() {
            log_warn!("config defaults in use");
        }

        self.state.reset();
        self.apply_config();

        self.state.mark_all_present();
        let mut hooks = StateHooks {
            config: self.config.store(),
            hw: &mut self.hw,
        };
        let state = self.state.validate(&mut hooks);
        if !state.is_clean() {
            log_warn!(
                "state validation: {} rejected, {} handler failures",
                state.rejected,
                state.handler_failures
            );
        }

        let discovery = self.hw.fabric.discover();

        BootReport {
            config,
            state,
            discovery,
        }
    }

    /// Re-apply Config values that have hardware side effects, without
    /// running validation.
    fn apply_config(&mut self) {
        let config = self.config.store();
        self.hw
            .fabric
            .set_base_address(config.switching_board_i2c_address());
        if !self.hw.attach_servo(config.servo_pin()) {
            log_warn!("servo attach failed");
        }
        if self.state.light_enabled() && !self.hw.apply_light(true, config.light_intensity()) {
            log_warn!("light update failed");
        }
    }

    // ── Config ───────────────────────────────────────────────────────────

    /// Current Config values
    pub fn config(&self) -> &PropertyStore<ConfigField> {
        self.config.store()
    }

    /// Validate, apply and persist one Config field.
    pub fn set_config(&mut self, field: ConfigField, value: Value) -> Result<(), ConfigError> {
        let mut hooks = ConfigHooks {
            state: &self.state,
            hw: &mut self.hw,
        };
        let result = self.config.set(field, value, &mut hooks);
        if let Err(ConfigError::Persist(e)) = result {
            log_error!("config save failed: {}", e);
        }
        result
    }

    /// Set the device identifier (at most 31 bytes) and persist.
    pub fn set_id(&mut self, id: &str) -> Result<(), ConfigError> {
        self.config.set_id(id)
    }

    /// Restore default Config, persist it and re-apply side effects.
    pub fn reset_config(&mut self) -> Result<(), PersistError> {
        let saved = self.config.reset();
        self.apply_config();
        saved
    }

    /// Reload Config from storage and re-apply side effects.
    pub fn load_config(&mut self) -> LoadStatus {
        let status = self.config.load();
        self.apply_config();
        status
    }

    /// Persist the current Config.
    pub fn save_config(&mut self) -> Result<(), PersistError> {
        self.config.save()
    }

    /// Status of the last Config load
    pub fn config_load_status(&self) -> LoadStatus {
        self.config.load_status()
    }

    /// Config loads that fell back to defaults
    pub fn config_load_failures(&self) -> u32 {
        self.config.load_failures()
    }

    // ── State ────────────────────────────────────────────────────────────

    /// Current State values
    pub fn state(&self) -> &PropertyStore<StateField> {
        &self.state
    }

    /// Validate one State field and drive the hardware for it.
    pub fn set_state(&mut self, field: StateField, value: Value) -> Result<(), PropertyError> {
        let mut hooks = StateHooks {
            config: self.config.store(),
            hw: &mut self.hw,
        };
        self.state.set(field, value, &mut hooks)
    }

    /// Move the magnet to the engaged angle.
    pub fn magnet_engage(&mut self) -> Result<(), PropertyError> {
        self.set_state(StateField::MagnetEngaged, Value::Bool(true))
    }

    /// Move the magnet to the retracted angle.
    pub fn magnet_disengage(&mut self) -> Result<(), PropertyError> {
        self.set_state(StateField::MagnetEngaged, Value::Bool(false))
    }

    /// Whether the magnet is engaged
    pub fn magnet_engaged(&self) -> bool {
        self.state.magnet_engaged()
    }

    /// Whether the boost stage is running
    pub fn boost_enabled(&self) -> bool {
        self.hw.waveform.is_boost_enabled()
    }

    /// Lowest voltage reachable with the current calibration
    pub fn min_waveform_voltage(&self) -> f32 {
        self.config.store().calibration().min_waveform_voltage()
    }

    // ── Channels ─────────────────────────────────────────────────────────

    /// Logical state of every channel, one bit per channel.
    pub fn state_of_channels(&mut self) -> Result<&[u8], FabricError> {
        self.hw.fabric.state_of_channels()
    }

    /// Drive every channel; `states.len()` must be `number_of_channels / 8`.
    pub fn set_state_of_channels(&mut self, states: &[u8]) -> Result<(), FabricError> {
        self.hw.fabric.set_state_of_channels(states)
    }

    /// Re-run expander discovery.
    pub fn discover_channels(&mut self) -> DiscoveryReport {
        self.hw.fabric.discover()
    }

    /// Channels found by discovery (or set manually)
    pub fn number_of_channels(&self) -> u16 {
        self.hw.fabric.number_of_channels()
    }

    /// Override the channel count.
    pub fn set_number_of_channels(&mut self, count: u16) -> Result<(), FabricError> {
        self.hw.fabric.set_number_of_channels(count)
    }

    // ── Identity ─────────────────────────────────────────────────────────

    /// Board hardware revision
    pub fn hardware_version(&self) -> &'static str {
        HARDWARE_VERSION
    }

    /// Unique device identifier
    pub fn uuid(&self) -> [u8; UUID_LEN] {
        self.uuid
    }

    /// `"<package>::<version>"` identification string
    pub fn device_id(&self) -> &'static str {
        device_id_response()
    }

    // ── Sampling ─────────────────────────────────────────────────────────

    /// Main-loop step: drain the sampling-done signal and update timing.
    pub fn poll(&mut self) -> Option<SamplingDone> {
        let done = self.irq.take_sampling_done()?;
        if let Some(previous) = self.sampling.sample {
            self.sampling.period_us = Some(self.clock.period_us(previous, done.sample));
        }
        self.sampling.timestamp_us = Some(self.clock.timestamp_us(done.sample));
        self.sampling.sample = Some(done.sample);
        self.sampling.channel = Some(done.channel);
        log_trace!("sampling done on channel {}", done.channel);
        Some(done)
    }

    /// Channel of the last drained sampling completion
    pub fn last_sampling_channel_done(&self) -> Option<u8> {
        self.sampling.channel
    }

    /// Interval between the last two completions (µs)
    pub fn sampling_period_us(&self) -> Option<u32> {
        self.sampling.period_us
    }

    /// Timestamp of the last completion (µs)
    pub fn sampling_timestamp_us(&self) -> Option<u64> {
        self.sampling.timestamp_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_duty_scales_and_clamps() {
        assert_eq!(light_duty(0.1, 255), 25);
        assert_eq!(light_duty(1.0, 255), 255);
        assert_eq!(light_duty(2.0, 255), 255);
        assert_eq!(light_duty(-1.0, 1000), 0);
        assert_eq!(light_duty(f32::NAN, 255), 0);
    }

    #[test]
    fn boot_stops_waveform_before_state_validation() {
        let position = |needle: &str| {
            BOOT_SEQUENCE_STEPS
                .iter()
                .position(|step| step.contains(needle))
        };
        let waveform = position("Waveform");
        let config = position("Config: load");
        let validate = position("validate");
        let discovery = position("discovery");
        assert!(waveform < config);
        assert!(config < validate);
        assert!(validate < discovery);
    }
}
