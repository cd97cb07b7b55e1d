//! DMF Controller Firmware
//!
//! Control core for a digital-microfluidics controller board: a validated
//! property store for persistent Config and transient State, a chain of
//! PCA9505 port expanders acting as the electrode switching fabric, and the
//! high-voltage boost and H-bridge square-wave driver.
//!
//! # Architecture
//!
//! ```text
//! Command surface (Controller)
//!         ↓
//! Property stores (Config → EEPROM, State → change handlers)
//!         ↓
//! Drivers (SwitchingFabric, WaveformController, servo, light)
//!         ↓
//! Platform HAL (platform crate: register maps, Board bundle, mocks)
//! ```
//!
//! Interrupt handlers share only an [`IrqContext`]: the waveform timer
//! toggles the H-bridge legs held inside it, and DMA completion signals the
//! main loop, which drains it in [`Controller::poll`].
//!
//! # Features
//!
//! - `defmt` - Log through defmt and derive `defmt::Format` (target builds)
//! - `std` - Log through tracing and enable `std::error::Error` (host builds)

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Critical correctness: deny these
#![deny(clippy::await_holding_lock)] // holding a blocking Mutex across .await is a bug
#![deny(unsafe_op_in_unsafe_fn)]
// Logging discipline
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![warn(clippy::dbg_macro)]
// Intentional allows for this codebase:
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::unused_self)]

#[macro_use]
mod log;

pub mod config;
pub mod controller;
pub mod fabric;
pub mod irq;
pub mod persist;
pub mod property;
pub mod state;
pub mod timestamp;
pub mod waveform;

// Re-export key types
pub use config::{Config, ConfigError, ConfigField};
pub use controller::{BootReport, Controller, Parts};
pub use fabric::{DiscoveryReport, FabricError, SwitchingFabric};
pub use irq::{IrqContext, SamplingDone};
pub use persist::{LoadStatus, PersistError};
pub use property::{PropertyError, PropertyStore, Value};
pub use state::StateField;
pub use timestamp::{CounterSample, TickClock};
pub use waveform::{WaveformController, WaveformError};
