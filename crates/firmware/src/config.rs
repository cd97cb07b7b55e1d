//! Persisted device configuration.
//!
//! Config is loaded once at boot (defaults when storage is blank or unusable)
//! and changes only through [`Config::set`], which persists immediately.

use core::fmt;

use embedded_storage::Storage;
use platform::board::{DEFAULT_SERVO_PIN, MAX_PIN};
use platform::pca9505::{is_valid_base_address, DEFAULT_BASE_ADDRESS};
use platform::servo::MAX_ANGLE_DEGREES;

use crate::persist::{LoadStatus, PersistError, Persistence};
use crate::property::{
    FieldDefault, FieldDescriptor, FieldHooks, FieldSet, PropertyError, PropertyStore,
    Value, TEXT_CAPACITY,
};
use crate::waveform::{FrequencyLimits, PotCalibration};

/// Longest accepted device identifier.
pub const ID_MAX_LEN: usize = TEXT_CAPACITY - 1;

/// Config fields in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigField {
    /// Free-form device identifier
    Id,
    /// 7-bit address of the first expander chip
    SwitchingBoardI2cAddress,
    /// Lowest accepted waveform frequency (Hz)
    MinFrequency,
    /// Highest accepted waveform frequency (Hz)
    MaxFrequency,
    /// Lowest accepted actuation voltage (V)
    MinVoltage,
    /// Highest accepted actuation voltage (V)
    MaxVoltage,
    /// Full-scale resistance of the digital potentiometer (Ω)
    PotMax,
    /// Series resistor R7 between pot and feedback node (Ω)
    R7,
    /// Servo angle with the magnet engaged (degrees)
    EngagedAngle,
    /// Servo angle with the magnet retracted (degrees)
    DisengagedAngle,
    /// Light brightness, 0..=1
    LightIntensity,
    /// Pin the magnet servo is attached to
    ServoPin,
}

impl FieldSet for ConfigField {
    const TABLE: &'static [FieldDescriptor<Self>] = &[
        FieldDescriptor {
            field: ConfigField::Id,
            name: "id",
            default: FieldDefault::Text(""),
        },
        FieldDescriptor {
            field: ConfigField::SwitchingBoardI2cAddress,
            name: "switching_board_i2c_address",
            default: FieldDefault::U32(DEFAULT_BASE_ADDRESS as u32),
        },
        FieldDescriptor {
            field: ConfigField::MinFrequency,
            name: "min_frequency",
            default: FieldDefault::F32(0.0),
        },
        FieldDescriptor {
            field: ConfigField::MaxFrequency,
            name: "max_frequency",
            default: FieldDefault::F32(10_000.0),
        },
        FieldDescriptor {
            field: ConfigField::MinVoltage,
            name: "min_voltage",
            default: FieldDefault::F32(0.0),
        },
        FieldDescriptor {
            field: ConfigField::MaxVoltage,
            name: "max_voltage",
            default: FieldDefault::F32(200.0),
        },
        FieldDescriptor {
            field: ConfigField::PotMax,
            name: "pot_max",
            default: FieldDefault::F32(50_000.0),
        },
        FieldDescriptor {
            field: ConfigField::R7,
            name: "r7",
            default: FieldDefault::F32(1_000.0),
        },
        FieldDescriptor {
            field: ConfigField::EngagedAngle,
            name: "engaged_angle",
            default: FieldDefault::U32(90),
        },
        FieldDescriptor {
            field: ConfigField::DisengagedAngle,
            name: "disengaged_angle",
            default: FieldDefault::U32(0),
        },
        FieldDescriptor {
            field: ConfigField::LightIntensity,
            name: "light_intensity",
            default: FieldDefault::F32(0.1),
        },
        FieldDescriptor {
            field: ConfigField::ServoPin,
            name: "servo_pin",
            default: FieldDefault::U32(DEFAULT_SERVO_PIN as u32),
        },
    ];
}

/// Typed accessors over the config store.
impl PropertyStore<ConfigField> {
    /// Device identifier
    pub fn id(&self) -> &str {
        self.get_text(ConfigField::Id)
    }

    /// Base address of the expander chain
    pub fn switching_board_i2c_address(&self) -> u8 {
        u8::try_from(self.get_u32(ConfigField::SwitchingBoardI2cAddress))
            .unwrap_or(DEFAULT_BASE_ADDRESS)
    }

    /// Accepted frequency range
    pub fn frequency_limits(&self) -> FrequencyLimits {
        FrequencyLimits {
            min: self.get_f32(ConfigField::MinFrequency),
            max: self.get_f32(ConfigField::MaxFrequency),
        }
    }

    /// Lowest accepted voltage
    pub fn min_voltage(&self) -> f32 {
        self.get_f32(ConfigField::MinVoltage)
    }

    /// Potentiometer calibration derived from config
    pub fn calibration(&self) -> PotCalibration {
        PotCalibration {
            max_voltage: self.get_f32(ConfigField::MaxVoltage),
            pot_max: self.get_f32(ConfigField::PotMax),
            series_ohms: self.get_f32(ConfigField::R7),
        }
    }

    /// Servo angle for the engaged (`true`) or retracted position
    pub fn magnet_angle(&self, engaged: bool) -> u8 {
        let field = if engaged {
            ConfigField::EngagedAngle
        } else {
            ConfigField::DisengagedAngle
        };
        u8::try_from(self.get_u32(field))
            .unwrap_or(MAX_ANGLE_DEGREES)
            .min(MAX_ANGLE_DEGREES)
    }

    /// Light brightness, 0..=1
    pub fn light_intensity(&self) -> f32 {
        self.get_f32(ConfigField::LightIntensity)
    }

    /// Servo pin
    pub fn servo_pin(&self) -> u8 {
        u8::try_from(self.get_u32(ConfigField::ServoPin)).unwrap_or(DEFAULT_SERVO_PIN)
    }
}

fn finite_non_negative(value: &Value) -> Option<f32> {
    value.as_f32().filter(|v| v.is_finite() && *v >= 0.0)
}

/// Side-effect-free rules for one config field.
///
/// Range pairs are checked against the sibling currently stored, so raising
/// `max_*` must happen before raising `min_*` past the old maximum.
pub fn validate_config_field(
    field: ConfigField,
    value: &Value,
    config: &PropertyStore<ConfigField>,
) -> bool {
    match field {
        ConfigField::Id => value.as_text().is_some_and(|id| id.len() <= ID_MAX_LEN),
        ConfigField::SwitchingBoardI2cAddress => value
            .as_u32()
            .and_then(|a| u8::try_from(a).ok())
            .is_some_and(is_valid_base_address),
        ConfigField::MinFrequency => finite_non_negative(value)
            .is_some_and(|v| v <= config.get_f32(ConfigField::MaxFrequency)),
        ConfigField::MaxFrequency => finite_non_negative(value)
            .is_some_and(|v| v >= config.get_f32(ConfigField::MinFrequency)),
        ConfigField::MinVoltage => {
            finite_non_negative(value).is_some_and(|v| v <= config.get_f32(ConfigField::MaxVoltage))
        }
        ConfigField::MaxVoltage => {
            finite_non_negative(value).is_some_and(|v| v >= config.get_f32(ConfigField::MinVoltage))
        }
        ConfigField::PotMax => finite_non_negative(value).is_some_and(|v| v > 0.0),
        ConfigField::R7 => finite_non_negative(value).is_some(),
        ConfigField::EngagedAngle | ConfigField::DisengagedAngle => value
            .as_u32()
            .is_some_and(|a| a <= u32::from(MAX_ANGLE_DEGREES)),
        ConfigField::LightIntensity => value.as_f32().is_some_and(|v| (0.0..=1.0).contains(&v)),
        ConfigField::ServoPin => value.as_u32().is_some_and(|p| p <= u32::from(MAX_PIN)),
    }
}

/// Config mutation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The store refused the value
    Property(PropertyError),
    /// The value was applied but could not be persisted
    Persist(PersistError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(e) => write!(f, "{e}"),
            Self::Persist(e) => write!(f, "applied but not saved: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

impl From<PropertyError> for ConfigError {
    fn from(e: PropertyError) -> Self {
        Self::Property(e)
    }
}

impl From<PersistError> for ConfigError {
    fn from(e: PersistError) -> Self {
        Self::Persist(e)
    }
}

/// Config store plus its persistence.
#[derive(Debug)]
pub struct Config<S> {
    store: PropertyStore<ConfigField>,
    persistence: Persistence<S>,
}

impl<S: Storage> Config<S> {
    /// Defaults, not yet loaded from `storage`
    pub fn new(storage: S) -> Self {
        Self {
            store: PropertyStore::new(),
            persistence: Persistence::new(storage),
        }
    }

    /// Current values
    pub fn store(&self) -> &PropertyStore<ConfigField> {
        &self.store
    }

    /// Reset to defaults, then restore whatever storage holds.
    pub fn load(&mut self) -> LoadStatus {
        self.persistence.load(&mut self.store)
    }

    /// Persist the current values.
    pub fn save(&mut self) -> Result<(), PersistError> {
        self.persistence.save(&self.store)
    }

    /// Reset to defaults (no handlers) and persist.
    pub fn reset(&mut self) -> Result<(), PersistError> {
        self.store.reset();
        self.save()
    }

    /// Validate, apply through `hooks`, then persist.
    pub fn set<H>(&mut self, field: ConfigField, value: Value, hooks: &mut H) -> Result<(), ConfigError>
    where
        H: FieldHooks<ConfigField> + ?Sized,
    {
        self.store.set(field, value, hooks)?;
        self.save()?;
        Ok(())
    }

    /// Set the identifier. Rejects text longer than [`ID_MAX_LEN`] bytes.
    pub fn set_id(&mut self, id: &str) -> Result<(), ConfigError> {
        let value = Value::text(id).ok_or(PropertyError::Rejected { field: "id" })?;
        self.set(ConfigField::Id, value, &mut ConfigRules)
    }

    /// Status of the last load
    pub fn load_status(&self) -> LoadStatus {
        self.persistence.status()
    }

    /// Loads that fell back to defaults because storage was unusable
    pub fn load_failures(&self) -> u32 {
        self.persistence.load_failures()
    }

    /// Borrow the storage device
    pub fn storage(&self) -> &S {
        self.persistence.storage()
    }
}

/// Field rules with no hardware side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigRules;

impl FieldHooks<ConfigField> for ConfigRules {
    fn validate(&self, field: ConfigField, value: &Value, store: &PropertyStore<ConfigField>) -> bool {
        validate_config_field(field, value, store)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use platform::mocks::MockEeprom;

    fn config() -> Config<MockEeprom> {
        let mut config = Config::new(MockEeprom::new(1024));
        config.load();
        config
    }

    #[test]
    fn defaults_describe_a_usable_board() {
        let config = config();
        let store = config.store();
        assert_eq!(store.switching_board_i2c_address(), 0x20);
        assert_eq!(store.frequency_limits().max, 10_000.0);
        assert_eq!(store.calibration().pot_max, 50_000.0);
        assert_eq!(store.servo_pin(), DEFAULT_SERVO_PIN);
        assert_eq!(store.id(), "");
    }

    #[test]
    fn set_persists_immediately() {
        let mut config = config();
        config
            .set(ConfigField::MaxVoltage, Value::F32(150.0), &mut ConfigRules)
            .unwrap();

        let mut reloaded = Config::new(config.storage().clone());
        assert!(reloaded.load().is_loaded());
        assert_eq!(reloaded.store().calibration().max_voltage, 150.0);
        assert!(reloaded.store().is_present(ConfigField::MaxVoltage));
    }

    #[test]
    fn min_cannot_cross_max() {
        let mut config = config();
        let err = config.set(ConfigField::MinFrequency, Value::F32(20_000.0), &mut ConfigRules);
        assert_eq!(
            err,
            Err(ConfigError::Property(PropertyError::Rejected {
                field: "min_frequency"
            }))
        );
        assert!(config
            .set(ConfigField::MaxVoltage, Value::F32(-1.0), &mut ConfigRules)
            .is_err());
    }

    #[test]
    fn set_id_enforces_length() {
        let mut config = config();
        config.set_id("chip-42").unwrap();
        assert_eq!(config.store().id(), "chip-42");

        assert!(config.set_id(&"x".repeat(ID_MAX_LEN + 1)).is_err());
        assert!(config.set_id(&"x".repeat(TEXT_CAPACITY + 5)).is_err());
        assert_eq!(config.store().id(), "chip-42");
    }

    #[test]
    fn base_address_must_leave_room_for_the_chain() {
        let mut config = config();
        assert!(config
            .set(ConfigField::SwitchingBoardI2cAddress, Value::U32(0x75), &mut ConfigRules)
            .is_err());
        assert!(config
            .set(ConfigField::SwitchingBoardI2cAddress, Value::U32(0x40), &mut ConfigRules)
            .is_ok());
        assert_eq!(config.store().switching_board_i2c_address(), 0x40);
    }

    #[test]
    fn reset_restores_and_persists_defaults() {
        let mut config = config();
        config.set_id("abc").unwrap();
        config.reset().unwrap();

        let mut reloaded = Config::new(config.storage().clone());
        reloaded.load();
        assert_eq!(reloaded.store().id(), "");
        assert!(!reloaded.store().is_present(ConfigField::Id));
    }

    #[test]
    fn corrupt_storage_loads_defaults_and_counts() {
        let mut config = config();
        config.set_id("abc").unwrap();
        let eeprom = config.storage().clone();
        eeprom.corrupt(20);

        let mut reloaded = Config::new(eeprom);
        let status = reloaded.load();
        assert!(!status.is_loaded());
        assert_eq!(reloaded.load_failures(), 1);
        assert_eq!(reloaded.store().id(), "");
    }
}
