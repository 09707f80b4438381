//! Calibration engine
//!
//! The calibration register relates the shunt resistance to the current LSB through
//!
//! ```text
//! cal = 0.00512 / (current_lsb * shunt)
//! ```
//!
//! where 0.00512 comes from the 2.5 µV shunt ADC LSB. The current register is a signed 16-bit
//! value, so the smallest useful current LSB is `max_current / 2^15`.

use core::fmt;

/// Full-scale shunt voltage of the INA226 in volts.
pub const MAX_SHUNT_VOLTAGE: f32 = 0.080;

/// Smallest accepted maximum current in amperes.
pub const MIN_MAX_CURRENT: f32 = 0.001;

/// Smallest accepted shunt resistance in ohms.
pub const MIN_SHUNT: f32 = 0.001;

/// Power register LSB relative to the current LSB.
pub const POWER_LSB_FACTOR: f32 = 25.0;

const CALIBRATION_SCALE: f32 = 0.00512;
const CURRENT_FULL_SCALE: f32 = 32768.0;

/// `CALIBRATION_SCALE / u16::MAX`, rounded to `1e-5 / 2^7`. Dividing by the shunt gives the
/// smallest current LSB the calibration register can express.
const SHUNT_LSB_FLOOR: f32 = 7.8125e-8;

/// Decades of the 1-2-5 series tried when normalizing, in µA/bit.
const NORMALIZE_DECADES: [u32; 4] = [1, 10, 100, 1000];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// `max_current * shunt` exceeds the 80 mV input range
    ShuntVoltageTooHigh,
    /// `max_current` below 1 mA
    MaxCurrentTooLow,
    /// `shunt` below 1 mΩ
    ShuntTooLow,
    /// No 1-2-5 value up to 5000 µA/bit covers the required current LSB
    NormalizeFailed,
}

impl CalibrationError {
    /// Legacy numeric code of this error. A failed register write is reported as `0x8004`.
    pub const fn code(self) -> u16 {
        match self {
            CalibrationError::ShuntVoltageTooHigh => 0x8000,
            CalibrationError::MaxCurrentTooLow => 0x8001,
            CalibrationError::ShuntTooLow => 0x8002,
            CalibrationError::NormalizeFailed => 0x8003,
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::ShuntVoltageTooHigh => write!(f, "Shunt voltage above 80 mV"),
            CalibrationError::MaxCurrentTooLow => write!(f, "Maximum current below 1 mA"),
            CalibrationError::ShuntTooLow => write!(f, "Shunt resistance below 1 mOhm"),
            CalibrationError::NormalizeFailed => write!(f, "Unable to normalize current LSB"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CalibrationError {}

/// Calibration state of a driver. All zero until the first successful calibration.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// Amperes per count of the current register
    pub current_lsb: f32,
    /// Shunt resistance in ohms
    pub shunt: f32,
    /// Largest current representable with `current_lsb`, in amperes
    pub max_current: f32,
}

impl Calibration {
    pub const UNCALIBRATED: Self = Self {
        current_lsb: 0.0,
        shunt: 0.0,
        max_current: 0.0,
    };

    pub fn is_calibrated(&self) -> bool {
        self.current_lsb != 0.0
    }

    /// Watts per count of the power register.
    pub fn power_lsb(&self) -> f32 {
        self.current_lsb * POWER_LSB_FACTOR
    }
}

/// Result of [`compute`]: the register value and the current LSB it implies.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationValue {
    pub current_lsb: f32,
    pub register: u16,
}

impl CalibrationValue {
    /// Calibration state once `register` has been written for `shunt`.
    pub fn into_calibration(self, shunt: f32) -> Calibration {
        Calibration {
            current_lsb: self.current_lsb,
            shunt,
            max_current: self.current_lsb * CURRENT_FULL_SCALE,
        }
    }
}

/// Computes the calibration register value for a maximum current (A) and shunt resistance (Ω).
///
/// With `normalize` the current LSB is rounded up to a 1-2-5 value in µA/bit, which keeps
/// readings easy to convert by hand at the cost of some resolution. If the exact value does
/// not fit the 16-bit register the LSB is doubled until it does, normalized or not.
pub fn compute(
    max_current: f32,
    shunt: f32,
    normalize: bool,
) -> Result<CalibrationValue, CalibrationError> {
    if max_current * shunt > MAX_SHUNT_VOLTAGE {
        return Err(CalibrationError::ShuntVoltageTooHigh);
    }
    if max_current < MIN_MAX_CURRENT {
        return Err(CalibrationError::MaxCurrentTooLow);
    }
    if shunt < MIN_SHUNT {
        return Err(CalibrationError::ShuntTooLow);
    }

    let mut current_lsb = max_current / CURRENT_FULL_SCALE;

    if normalize {
        // a small shunt relative to max_current makes the register ceiling the limit
        let shunt_floor = SHUNT_LSB_FLOOR / shunt;
        if shunt_floor > current_lsb {
            current_lsb = shunt_floor;
        }
        current_lsb =
            normalize_current_lsb(current_lsb).ok_or(CalibrationError::NormalizeFailed)?;
    }

    let mut register = round(CALIBRATION_SCALE / (current_lsb * shunt));
    while register > u16::MAX as u32 {
        current_lsb *= 2.0;
        register >>= 1;
    }

    Ok(CalibrationValue {
        current_lsb,
        register: register as u16,
    })
}

/// Rounds `current_lsb` up to the next value of 1, 2 or 5 × 10^n µA, n in 0..=3.
pub(crate) fn normalize_current_lsb(current_lsb: f32) -> Option<f32> {
    // truncate then add one instead of ceil
    let lsb_ua = (current_lsb * 1e6) as u32 + 1;

    NORMALIZE_DECADES
        .iter()
        .flat_map(|decade| [1, 2, 5].map(|step| step * decade))
        .find(|candidate| *candidate >= lsb_ua)
        .map(|candidate| candidate as f32 * 1e-6)
}

/// Round half up for non-negative values, `f32::round` needs std.
fn round(value: f32) -> u32 {
    (value + 0.5) as u32
}
