//! Transient runtime state.
//!
//! Never persisted. At boot every field is marked present and validated once
//! so each change handler runs with its default value before the first
//! external request.

use crate::config::ConfigField;
use crate::property::{FieldDefault, FieldDescriptor, FieldSet, PropertyStore, Value};

/// State fields in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateField {
    /// Requested actuation voltage (V)
    Voltage,
    /// Requested waveform frequency (Hz), 0 for DC
    Frequency,
    /// Boost stage running
    HvOutputEnabled,
    /// HV path routed to the primary output
    HvOutputSelected,
    /// Magnet servo at the engaged angle
    MagnetEngaged,
    /// Light on at the configured intensity
    LightEnabled,
}

impl FieldSet for StateField {
    const TABLE: &'static [FieldDescriptor<Self>] = &[
        FieldDescriptor {
            field: StateField::Voltage,
            name: "voltage",
            default: FieldDefault::F32(100.0),
        },
        FieldDescriptor {
            field: StateField::Frequency,
            name: "frequency",
            default: FieldDefault::F32(10_000.0),
        },
        FieldDescriptor {
            field: StateField::HvOutputEnabled,
            name: "hv_output_enabled",
            default: FieldDefault::Bool(false),
        },
        FieldDescriptor {
            field: StateField::HvOutputSelected,
            name: "hv_output_selected",
            default: FieldDefault::Bool(true),
        },
        FieldDescriptor {
            field: StateField::MagnetEngaged,
            name: "magnet_engaged",
            default: FieldDefault::Bool(false),
        },
        FieldDescriptor {
            field: StateField::LightEnabled,
            name: "light_enabled",
            default: FieldDefault::Bool(false),
        },
    ];
}

impl PropertyStore<StateField> {
    /// Requested voltage
    pub fn voltage(&self) -> f32 {
        self.get_f32(StateField::Voltage)
    }

    /// Requested frequency
    pub fn frequency(&self) -> f32 {
        self.get_f32(StateField::Frequency)
    }

    /// Boost stage requested on
    pub fn hv_output_enabled(&self) -> bool {
        self.get_bool(StateField::HvOutputEnabled)
    }

    /// Primary output selected
    pub fn hv_output_selected(&self) -> bool {
        self.get_bool(StateField::HvOutputSelected)
    }

    /// Magnet engaged
    pub fn magnet_engaged(&self) -> bool {
        self.get_bool(StateField::MagnetEngaged)
    }

    /// Light on
    pub fn light_enabled(&self) -> bool {
        self.get_bool(StateField::LightEnabled)
    }
}

/// Range rules for one State field against the current Config.
///
/// Voltage must lie in `[min_voltage, max_voltage]`; whether the
/// potentiometer can reach it is checked by the voltage handler.
pub fn validate_state_field(
    field: StateField,
    value: &Value,
    config: &PropertyStore<ConfigField>,
) -> bool {
    match field {
        StateField::Voltage => value.as_f32().is_some_and(|v| {
            (config.min_voltage()..=config.calibration().max_voltage).contains(&v)
        }),
        StateField::Frequency => value
            .as_f32()
            .is_some_and(|f| config.frequency_limits().contains(f)),
        StateField::HvOutputEnabled
        | StateField::HvOutputSelected
        | StateField::MagnetEngaged
        | StateField::LightEnabled => value.as_bool().is_some(),
    }
}
