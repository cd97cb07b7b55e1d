//! Board description: pin map, analog front-end constants and the
//! [`Board`] bundle of peripheral types.
//!
//! # Pin map (controller board rev 0.3)
//!
//! | Signal              | Pin | Notes                                   |
//! |---------------------|-----|-----------------------------------------|
//! | Light PWM           | 5   | LED ring, 8-bit PWM                     |
//! | Waveform HIGH       | 6   | H-bridge leg, toggled by timer ISR      |
//! | Waveform LOW        | 7   | complement of HIGH                      |
//! | HV output select    | 8   | active low                              |
//! | Servo (default)     | 9   | overridable from config                 |
//! | Boost SHDN          | 4   | low = boost running                     |
//! | Pot chip select     | 10  | MCP41050, active low                    |
//! | SPI SCK / MOSI      | 13 / 11 |                                     |

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{OutputPin, StatefulOutputPin};
use embedded_hal::i2c::I2c;
use embedded_hal::pwm::SetDutyCycle;
use embedded_hal::spi::SpiDevice;
use embedded_storage::Storage;

use crate::servo::Servo;
use crate::timer::PeriodicTimer;

/// Light PWM output.
pub const LIGHT_PIN: u8 = 5;
/// Waveform H-bridge high leg.
pub const WAVEFORM_HIGH_PIN: u8 = 6;
/// Waveform H-bridge low leg.
pub const WAVEFORM_LOW_PIN: u8 = 7;
/// High-voltage output select line.
pub const HV_OUTPUT_SELECT_PIN: u8 = 8;
/// Default servo signal pin.
pub const DEFAULT_SERVO_PIN: u8 = 9;
/// Boost converter shutdown line.
pub const BOOST_SHDN_PIN: u8 = 4;
/// Digital potentiometer chip select.
pub const POT_CS_PIN: u8 = 10;
/// SPI clock.
pub const SCK_PIN: u8 = 13;
/// SPI data out.
pub const MOSI_PIN: u8 = 11;
/// Highest pin number on the controller header.
pub const MAX_PIN: u8 = 63;

/// Expander bus clock.
pub const I2C_CLOCK_HZ: u32 = 400_000;

/// Boost stage feedback resistor R6 (Ω).
pub const R6_OHMS: f32 = 680_000.0;
/// Boost controller feedback reference (V).
pub const FEEDBACK_REFERENCE_VOLTS: f32 = 1.5;

/// Peripheral types making up one controller board.
///
/// Implementations are zero-sized markers; the instances themselves are
/// handed to the controller at construction.
pub trait Board {
    /// Expander chain bus.
    type Bus: I2c;
    /// Digital potentiometer on its own chip select.
    type Pot: SpiDevice;
    /// Plain control lines (boost SHDN, HV output select).
    type Control: OutputPin;
    /// Waveform H-bridge legs, read back by the timer interrupt.
    type Wave: StatefulOutputPin;
    /// Waveform timer.
    type Timer: PeriodicTimer;
    /// Blocking delay.
    type Delay: DelayNs;
    /// Magnet servo.
    type Servo: Servo;
    /// Light PWM channel.
    type Light: SetDutyCycle;
    /// Byte-addressed configuration storage.
    type Eeprom: Storage;
}
