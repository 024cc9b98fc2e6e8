//! # Keynet
//!
//! Keypad-secured control network: one controller node and fixed-function
//! peripheral nodes sharing a two-wire bus.
//!
//! ## Features
//!
//! - **Interrupt-driven bus engine**: non-blocking transaction start, byte
//!   streaming from interrupt context, NACK replay with an optional retry cap
//! - **Lock box**: passkey lock, eight LED bar animations, windowed
//!   temperature readout on the LCD
//! - **Thermostat**: heat/cool/match-ambient/off control against an LM92
//!   ambient sensor, elapsed time from an RTC
//! - **Peripheral interpreters**: LCD command decoder and LED bar node
//! - **Embedded-friendly**: no heap in node logic, fixed-size buffers
//!
//! ## Quick Start
//!
//! ```rust
//! use keynet::config::ControllerConfig;
//! use keynet::lock::LockState;
//! use keynet::sim::Network;
//!
//! let mut net = Network::new(ControllerConfig::default()).unwrap();
//! net.press_all(b"1111").unwrap();
//! assert_eq!(net.controller.lock_state(), LockState::Unlocked);
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - transaction engine (master) and slave endpoint
//! - [`filter`] - sample window and temperature conversion
//! - [`pattern`] - LED bar pattern generator
//! - [`lock`] - passkey state machine
//! - [`dispatcher`] - controller foreground loop and handler entry points
//! - [`peripheral`] - LCD and LED bar command interpreters
//! - [`protocol`] - addresses, opcodes and the transfer queue
//! - [`sim`] - in-memory bus and network harness

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod hal;
pub mod lock;
pub mod pattern;
pub mod peripheral;
pub mod protocol;
pub mod signals;
pub mod sim;
pub mod thermostat;

pub use bus::{BusEngine, BusEvent, BusHal, Direction, RetryPolicy};
pub use config::{ControllerConfig, Variant};
pub use dispatcher::Controller;
pub use error::{BusError, NodeError, SimError};
pub use sim::Network;
