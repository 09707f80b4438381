use bitflags::bitflags;

bitflags! {
    /// Alert functions of the mask/enable register. Only one should be set at a time, the
    /// device uses the highest one.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct AlertMask: u16 {
        const SHUNT_OVER_VOLTAGE  = 1 << 15;
        const SHUNT_UNDER_VOLTAGE = 1 << 14;
        const BUS_OVER_VOLTAGE    = 1 << 13;
        const BUS_UNDER_VOLTAGE   = 1 << 12;
        const POWER_OVER_LIMIT    = 1 << 11;
        /// Assert the alert pin when a conversion is ready
        const CONVERSION_READY    = 1 << 10;
    }
}

bitflags! {
    /// Status flags of the mask/enable register.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct AlertFlags: u16 {
        /// The selected alert function triggered
        const ALERT_FUNCTION   = 1 << 4;
        /// A conversion cycle has finished
        const CONVERSION_READY = 1 << 3;
        /// Current or power exceeded its register range
        const MATH_OVERFLOW    = 1 << 2;
        const ALERT_POLARITY   = 1 << 1;
        const ALERT_LATCH      = 1 << 0;
    }
}

/// Writable part of the mask/enable register.
pub(crate) const ALERT_MASK_BITS: u16 = 0xFC00;

/// Status part of the mask/enable register.
pub(crate) const ALERT_FLAG_BITS: u16 = 0x001F;

#[cfg(feature = "defmt")]
impl defmt::Format for AlertMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "AlertMask({=u16:#06x})", self.bits());
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AlertFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "AlertFlags({=u16:#06x})", self.bits());
    }
}
