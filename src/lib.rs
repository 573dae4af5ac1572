//! GPU telemetry sampler emitting InfluxDB line protocol.
//!
//! Every tick each managed device is queried through a [`telemetry::TelemetryApi`]
//! backend, every query result is kept as a [`field::Field`] so one failing
//! metric never hides the others, and the result is written as one record per
//! device. With the `dram` feature the memory temperature is also read from a
//! device register through a mapped page of physical memory.

pub mod config;
pub mod emulator;
pub mod error;
pub mod exporter;
pub mod field;
pub mod hardware;
pub mod line_protocol;
pub mod logging;
pub mod nvml;
#[cfg(feature = "dram")]
pub mod pci;
#[cfg(feature = "dram")]
pub mod register;
pub mod registry;
pub mod snapshot;
pub mod telemetry;
