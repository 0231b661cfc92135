#![cfg_attr(not(test), no_std)]

//! Guided identification of the DS18B20 probes on an ASCD charger's 1Wire
//! bus.
//!
//! Every battery slot on the charger has a DS18B20 glued to it, plus one
//! more for ambient, all on one bus. Nothing about a ROM ID says which slot
//! it sits in, so the charger firmware carries a hand-made table. This crate
//! builds that table: it finds the sensors, asks the operator to warm one
//! probe at a time, watches which reading jumps, and prints the result as a
//! `DeviceAddress` initializer.
//!
//! Layers, bottom up:
//!
//! - [`onewire`]: ROM IDs, CRC8, the AN187 ROM search, written against the
//!   [`OneWire`] trait.
//! - [`devices`]: DS18 family codes, resolutions, scratchpad decoding.
//! - [`bus`]: the [`SensorBus`] port the procedure talks to, and [`Ds18Bus`]
//!   which implements it over any [`OneWire`].
//! - [`console`]: the operator [`Console`] port.
//! - [`identify`]: the procedure itself.
//! - `pio_onewire` / `uart_console` (feature `rp2040`): the RP2040 PIO 1Wire master
//!   and a UART console, used by the `identify` binary.
//!
//! The PIO program and much of the master's structure come from
//! github stefanalt/RP2040-PIO-1-Wire-Master, marked as follows:
//!-
//!-; SPDX-License-Identifier: BSD-3-Clause
//!-;
//!-; 1-Wire is a tradmark of Maxim Integrated
//!
//! Only the identification core is built on the host; `cargo test` runs
//! against a simulated wire and scripted doubles.

mod fmt;

pub mod bus;
pub mod console;
pub mod devices;
pub mod error;
pub mod identify;
pub mod onewire;
pub mod sensor;
pub mod table;

#[cfg(feature = "rp2040")]
pub mod pio_onewire;
#[cfg(feature = "rp2040")]
pub mod uart_console;

#[cfg(test)]
mod sim;

pub use bus::{Ds18Bus, SensorBus, MAX_SENSORS};
pub use console::Console;
pub use devices::{Precision, TemperatureSensorFamily, DEVICE_DISCONNECTED_C};
pub use error::{BusError, ConsoleError, IdentifyError, TableError};
pub use identify::{BaselinePolicy, Calibration, IdentifyConfig, Identifier};
pub use onewire::{OneWire, RomId, SearchState};
pub use sensor::{Sensor, SensorSet};
pub use table::{AssignmentTable, TableLiteral};
