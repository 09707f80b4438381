//!
//! A platform-agnostic driver for the INA226 current and power monitor. Built using embedded-hal.
//!
//! The INA226 measures the voltage across a shunt resistor and the bus voltage, and derives
//! current and power from a calibration register. [`INA226Driver::set_max_current_shunt`]
//! maps a physical shunt resistor and an expected maximum current onto that register.
//!

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod alert;
pub mod calibration;
pub mod configuration;
pub mod driver;
pub mod register;

pub use alert::{AlertFlags, AlertMask};
pub use calibration::{Calibration, CalibrationError};
pub use configuration::{Averaging, Configuration, ConversionTime, InvalidFieldValue, Mode};
pub use driver::*;
pub use register::Register;
