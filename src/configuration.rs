//! Configuration register model
//!
//! The configuration register packs four 3-bit selectors and a reset bit into 16 bits:
//!
//! | bits  | field                         |
//! |-------|-------------------------------|
//! | 15    | reset (self-clearing)         |
//! | 11..9 | [`Averaging`]                 |
//! | 8..6  | bus [`ConversionTime`]        |
//! | 5..3  | shunt [`ConversionTime`]      |
//! | 2..0  | [`Mode`]                      |
//!
//! Everything in here is pure bit arithmetic, the driver does the register I/O.

use core::fmt;

/// Position of a sub-field inside the configuration register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Field {
    shift: u8,
    width: u8,
}

impl Field {
    pub const fn new(shift: u8, width: u8) -> Self {
        Self { shift, width }
    }

    /// In-register mask of this field.
    pub const fn mask(self) -> u16 {
        ((1u16 << self.width) - 1) << self.shift
    }

    /// Replaces this field in `reg` with `value`, leaving all other bits alone.
    pub const fn insert(self, reg: u16, value: u16) -> u16 {
        (reg & !self.mask()) | ((value << self.shift) & self.mask())
    }

    /// Extracts this field from `reg`, shifted down to bit 0.
    pub const fn extract(self, reg: u16) -> u16 {
        (reg & self.mask()) >> self.shift
    }
}

pub const AVERAGING: Field = Field::new(9, 3);
pub const BUS_CONVERSION_TIME: Field = Field::new(6, 3);
pub const SHUNT_CONVERSION_TIME: Field = Field::new(3, 3);
pub const MODE: Field = Field::new(0, 3);

/// Number of samples per averaging selector.
const AVERAGING_SAMPLES: [u16; 8] = [1, 4, 16, 64, 128, 256, 512, 1024];

/// Conversion time in microseconds per conversion time selector.
const CONVERSION_TIME_US: [u32; 8] = [140, 204, 332, 588, 1100, 2116, 4156, 8244];

/// Returned when a raw selector does not fit its 3-bit field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidFieldValue(pub u8);

impl fmt::Display for InvalidFieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid configuration field value: {}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidFieldValue {}

/// Number of samples averaged into one reported value.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Averaging {
    #[default]
    Samples1 = 0,
    Samples4 = 1,
    Samples16 = 2,
    Samples64 = 3,
    Samples128 = 4,
    Samples256 = 5,
    Samples512 = 6,
    Samples1024 = 7,
}

impl Averaging {
    pub const fn sample_count(self) -> u16 {
        AVERAGING_SAMPLES[self as usize]
    }

    fn from_field(bits: u16) -> Self {
        match bits & 0b111 {
            0 => Self::Samples1,
            1 => Self::Samples4,
            2 => Self::Samples16,
            3 => Self::Samples64,
            4 => Self::Samples128,
            5 => Self::Samples256,
            6 => Self::Samples512,
            7 => Self::Samples1024,
            _ => unreachable!(),
        }
    }
}

impl TryFrom<u8> for Averaging {
    type Error = InvalidFieldValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Self::from_field(value as u16)),
            _ => Err(InvalidFieldValue(value)),
        }
    }
}

/// Duration of a single bus or shunt voltage conversion.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConversionTime {
    Us140 = 0,
    Us204 = 1,
    Us332 = 2,
    Us588 = 3,
    #[default]
    Us1100 = 4,
    Us2116 = 5,
    Us4156 = 6,
    Us8244 = 7,
}

impl ConversionTime {
    pub const fn micros(self) -> u32 {
        CONVERSION_TIME_US[self as usize]
    }

    fn from_field(bits: u16) -> Self {
        match bits & 0b111 {
            0 => Self::Us140,
            1 => Self::Us204,
            2 => Self::Us332,
            3 => Self::Us588,
            4 => Self::Us1100,
            5 => Self::Us2116,
            6 => Self::Us4156,
            7 => Self::Us8244,
            _ => unreachable!(),
        }
    }
}

impl TryFrom<u8> for ConversionTime {
    type Error = InvalidFieldValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Self::from_field(value as u16)),
            _ => Err(InvalidFieldValue(value)),
        }
    }
}

/// Operating mode. `PowerDownAlt` (4) behaves exactly like `PowerDown` (0).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    PowerDown = 0,
    ShuntTriggered = 1,
    BusTriggered = 2,
    ShuntBusTriggered = 3,
    PowerDownAlt = 4,
    ShuntContinuous = 5,
    BusContinuous = 6,
    #[default]
    ShuntBusContinuous = 7,
}

impl Mode {
    /// Whether a conversion cycle in this mode samples the bus voltage.
    pub const fn measures_bus(self) -> bool {
        matches!(
            self,
            Self::BusTriggered
                | Self::ShuntBusTriggered
                | Self::BusContinuous
                | Self::ShuntBusContinuous
        )
    }

    /// Whether a conversion cycle in this mode samples the shunt voltage.
    pub const fn measures_shunt(self) -> bool {
        matches!(
            self,
            Self::ShuntTriggered
                | Self::ShuntBusTriggered
                | Self::ShuntContinuous
                | Self::ShuntBusContinuous
        )
    }

    fn from_field(bits: u16) -> Self {
        match bits & 0b111 {
            0 => Self::PowerDown,
            1 => Self::ShuntTriggered,
            2 => Self::BusTriggered,
            3 => Self::ShuntBusTriggered,
            4 => Self::PowerDownAlt,
            5 => Self::ShuntContinuous,
            6 => Self::BusContinuous,
            7 => Self::ShuntBusContinuous,
            _ => unreachable!(),
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = InvalidFieldValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Self::from_field(value as u16)),
            _ => Err(InvalidFieldValue(value)),
        }
    }
}

/// Decoded configuration register.
///
/// The driver keeps one of these as a cache of what was last written, so the conversion
/// timeout can be estimated without a bus round-trip. `Default` is the power-on state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Configuration {
    pub averaging: Averaging,
    pub bus_conversion_time: ConversionTime,
    pub shunt_conversion_time: ConversionTime,
    pub mode: Mode,
}

impl Configuration {
    pub fn from_bits(reg: u16) -> Self {
        Self {
            averaging: Averaging::from_field(AVERAGING.extract(reg)),
            bus_conversion_time: ConversionTime::from_field(BUS_CONVERSION_TIME.extract(reg)),
            shunt_conversion_time: ConversionTime::from_field(SHUNT_CONVERSION_TIME.extract(reg)),
            mode: Mode::from_field(MODE.extract(reg)),
        }
    }

    /// Register value for this configuration. The reset bit is never set.
    pub fn bits(&self) -> u16 {
        let reg = AVERAGING.insert(0, self.averaging as u16);
        let reg = BUS_CONVERSION_TIME.insert(reg, self.bus_conversion_time as u16);
        let reg = SHUNT_CONVERSION_TIME.insert(reg, self.shunt_conversion_time as u16);
        MODE.insert(reg, self.mode as u16)
    }

    /// Theoretical duration of one full conversion cycle in microseconds.
    pub fn conversion_time_us(&self) -> u32 {
        let samples = self.averaging.sample_count() as u32;
        let bus_us = if self.mode.measures_bus() {
            samples * self.bus_conversion_time.micros()
        } else {
            0
        };
        let shunt_us = if self.mode.measures_shunt() {
            samples * self.shunt_conversion_time.micros()
        } else {
            0
        };
        bus_us + shunt_us
    }

    /// Upper bound in milliseconds for one conversion cycle to finish.
    ///
    /// The device runs about 3% slower than the datasheet times, so 5% slack is added on top
    /// of the theoretical time, plus 2 ms to absorb rounding.
    pub fn conversion_timeout_ms(&self) -> u32 {
        (105 * self.conversion_time_us()).div_ceil(100_000) + 2
    }
}
