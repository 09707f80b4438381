/// Register addresses of the INA226.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Register {
    /// Averaging, conversion times, operating mode and reset
    Configuration = 0x00,
    /// Shunt voltage, signed, 2.5 µV/LSB
    ShuntVoltage = 0x01,
    /// Bus voltage, unsigned, 1.25 mV/LSB
    BusVoltage = 0x02,
    /// Power, unsigned, 25 × current LSB
    Power = 0x03,
    /// Current, signed, current LSB
    Current = 0x04,
    /// Calibration value, sets the current and power LSB
    Calibration = 0x05,
    /// Alert enable bits and status flags
    MaskEnable = 0x06,
    /// Limit compared against the selected alert function
    AlertLimit = 0x07,
    ManufacturerId = 0xFE,
    DieId = 0xFF,
}

/// Expected content of [`Register::ManufacturerId`] ("TI").
pub const MANUFACTURER_ID: u16 = 0x5449;

/// Expected content of [`Register::DieId`].
pub const DIE_ID: u16 = 0x2260;

/// Configuration register value after power-on or reset.
pub const CONFIGURATION_DEFAULT: u16 = 0x4127;

/// Self-clearing reset bit of the configuration register.
pub const CONFIGURATION_RESET: u16 = 1 << 15;
