#![warn(clippy::all)]

//! Lifecycle of NB fingerprint sensors.
//!
//! A sensor goes through the same stages every time it is used:
//!
//! 1. [`DeviceRegistry`] finds it and hands out an exclusive [`Device`] handle.
//! 2. [`SessionManager`] authenticates, using the handshake of the sensor's [`SecurityModel`].
//! 3. [`CalibrationManager`] pushes the sensor's compensation data, generating it on first use.
//! 4. [`CaptureController`] runs snapshot or continuous scans and scores the final frame.
//!
//! [`Reader`] strings these together behind the command verbs of [`Command`].
//!
//! ```no_run
//! use nbdevices::sim::{SimulatedBus, SimulatedSensor};
//! use nbdevices::{Device, Reader, Settings};
//! use std::sync::Arc;
//!
//! # fn main() -> nbdevices::Result<()> {
//! let bus = SimulatedBus::new();
//! bus.plug(SimulatedSensor::with_serial("usb-1", "SN0001"));
//!
//! let settings = Settings::load_default()?;
//! let mut reader = Reader::from_settings(&settings, Arc::new(bus), |_: &Device| true)?;
//! reader.connect()?;
//! println!("{}", reader.scan_snapshot()?);
//! # Ok(())
//! # }
//! ```

mod calibration;
mod capture;
mod config;
mod device;
mod errors;
mod quality;
mod reader;
mod registry;
mod scan;
mod security;
mod session;

pub use crate::{
    calibration::*, capture::*, config::*, device::*, errors::*, quality::*, reader::*,
    registry::*, scan::*, security::*, session::*,
};
pub use nbdevices_driver::{
    sim, BlobParameter, Capabilities, ConnectionType, DeviceChange, DeviceInfo, DeviceState,
    Driver, DriverError, DriverResult, ScanEvent, ScanFormat, ScanFrame, ScanStatus,
    SecurityModel, SpiBus, Transport,
};

pub type Result<T> = std::result::Result<T, NBError>;

/// Version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
