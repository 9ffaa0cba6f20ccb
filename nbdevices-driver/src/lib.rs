#![warn(clippy::all)]

//! Raw command interface of NB fingerprint sensors.
//!
//! Vendor backends implement [`Driver`] for a single connected sensor and [`Transport`] for
//! enumeration. The [`sim`] module provides a software sensor with the same surface, used by
//! the sample application and by tests.

mod driver;
mod errors;
pub mod sim;
mod types;

pub use crate::{driver::*, errors::*, types::*};
