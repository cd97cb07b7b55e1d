//! Hardware Abstraction Layer (HAL) for the DMF controller board
//!
//! This crate describes the board the controller firmware runs on, so the
//! firmware can be developed and tested without physical hardware.
//!
//! # Architecture Layers
//!
//! ```text
//! Application Layer (firmware crate: property store, fabric, waveform)
//!         ↓
//! Platform HAL (this crate: chip register maps, traits, board bundle)
//!         ↓
//! embedded-hal 1.0 implementations from the MCU HAL
//! ```
//!
//! # Contents
//!
//! - [`pca9505`] - 40-bit I2C port expander register map
//! - [`mcp41050`] - SPI digital potentiometer frame format
//! - [`board`] - pin map, analog constants and the [`Board`] bundle trait
//! - [`PeriodicTimer`] and [`Servo`] - peripherals embedded-hal does not cover
//! - [`mocks`] - host mocks (feature `std` or tests)
//!
//! # Features
//!
//! - `std`: Enable host mocks
//! - `defmt`: Enable defmt logging

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors; callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod board;
pub mod config;
pub mod mcp41050;
pub mod mocks;
pub mod pca9505;
pub mod servo;
pub mod timer;

pub use board::Board;
pub use servo::Servo;
pub use timer::PeriodicTimer;
