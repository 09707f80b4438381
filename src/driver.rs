use crate::alert::{AlertFlags, AlertMask, ALERT_FLAG_BITS, ALERT_MASK_BITS};
use crate::calibration::{self, Calibration, CalibrationError};
use crate::configuration::{
    self, Averaging, Configuration, ConversionTime, Field, InvalidFieldValue, Mode,
};
use crate::register::{Register, CONFIGURATION_RESET, DIE_ID, MANUFACTURER_ID};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};

/// Fixed bus voltage LSB in volts.
const BUS_VOLTAGE_LSB: f32 = 1.25e-3;

/// Fixed shunt voltage LSB in volts.
const SHUNT_VOLTAGE_LSB: f32 = 2.5e-6;

/// Poll interval of the conversion ready wait.
const POLL_INTERVAL_MS: u32 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum INA226Error<I2C> {
    /// The identification registers do not read as an INA226
    Connect,
    I2c(I2C),
    Calibration(CalibrationError),
    InvalidArgument,
}

impl<I2C> From<CalibrationError> for INA226Error<I2C> {
    fn from(err: CalibrationError) -> Self {
        INA226Error::Calibration(err)
    }
}

impl<I2C> From<InvalidFieldValue> for INA226Error<I2C> {
    fn from(_: InvalidFieldValue) -> Self {
        INA226Error::InvalidArgument
    }
}

pub struct INA226InitConfig {
    /// Averaging, conversion times and operating mode
    pub configuration: Configuration,
    /// Largest current expected through the shunt, in amperes
    pub max_current: f32,
    /// Shunt resistance in ohms
    pub shunt: f32,
    /// Round the current LSB up to a 1-2-5 value
    pub normalize: bool,
}

impl Default for INA226InitConfig {
    /// 20 A over a 2 mΩ shunt with the power-on configuration.
    fn default() -> Self {
        Self {
            configuration: Configuration::default(),
            max_current: 20.0,
            shunt: 0.002,
            normalize: true,
        }
    }
}

/// Driver for a single INA226 on an I2C bus.
///
/// The bus access for a register is split into a pointer write and a data read, so access to
/// the bus must be serialized by the caller if it is shared.
pub struct INA226Driver<I2C, Delay> {
    i2c: I2C,
    delay: Delay,
    address: u8,
    config: Configuration,
    calibration: Calibration,
}

impl<I2C, Delay> INA226Driver<I2C, Delay>
where
    I2C: I2c,
    Delay: DelayNs,
{
    ///
    ///
    /// # Arguments
    ///
    /// * `i2c`: The i2c bus.
    /// * `delay`: The delay used while waiting for conversions.
    /// * `address`: 7-bit device address, 0x40 to 0x4F depending on the A0/A1 pins.
    /// * `init_config`: An optional config that checks the device identity, programs the
    /// configuration register and calibrates. If this is not provided, the driver assumes the
    /// power-on configuration and is uncalibrated.
    ///
    /// returns: Result<INA226Driver<I2C, Delay>, INA226Error<<I2C as ErrorType>::Error>>
    pub fn new(
        i2c: I2C,
        delay: Delay,
        address: u8,
        init_config: Option<INA226InitConfig>,
    ) -> Result<Self, INA226Error<I2C::Error>> {
        let mut driver = Self {
            i2c,
            delay,
            address,
            config: Configuration::default(),
            calibration: Calibration::UNCALIBRATED,
        };

        if let Some(init) = init_config {
            if driver.manufacturer_id()? != MANUFACTURER_ID || driver.die_id()? != DIE_ID {
                return Err(INA226Error::Connect);
            }

            driver.set_configuration(init.configuration)?;
            driver.set_max_current_shunt(init.max_current, init.shunt, init.normalize)?;
        }

        Ok(driver)
    }

    /// Gives back the bus and the delay.
    pub fn release(self) -> (I2C, Delay) {
        (self.i2c, self.delay)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Checks that the device acknowledges its address.
    pub fn is_connected(&mut self) -> Result<bool, INA226Error<I2C::Error>> {
        match self.i2c.write(self.address, &[]) {
            Ok(()) => Ok(true),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
                ) =>
            {
                Ok(false)
            }
            Err(err) => Err(INA226Error::I2c(err)),
        }
    }

    // Measurements

    /// Bus voltage in volts.
    pub fn get_bus_voltage(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.read16(Register::BusVoltage)? as f32 * BUS_VOLTAGE_LSB)
    }

    /// Shunt voltage in volts.
    pub fn get_shunt_voltage(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.read16(Register::ShuntVoltage)? as i16 as f32 * SHUNT_VOLTAGE_LSB)
    }

    /// Current in amperes. Always 0 while uncalibrated.
    pub fn get_current(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.read16(Register::Current)? as i16 as f32 * self.calibration.current_lsb)
    }

    /// Power in watts. Always 0 while uncalibrated.
    pub fn get_power(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.read16(Register::Power)? as f32 * self.calibration.power_lsb())
    }

    pub fn get_bus_voltage_mv(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_bus_voltage()? * 1e3)
    }

    pub fn get_shunt_voltage_mv(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_shunt_voltage()? * 1e3)
    }

    pub fn get_current_ma(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_current()? * 1e3)
    }

    pub fn get_power_mw(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_power()? * 1e3)
    }

    pub fn get_bus_voltage_uv(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_bus_voltage()? * 1e6)
    }

    pub fn get_shunt_voltage_uv(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_shunt_voltage()? * 1e6)
    }

    pub fn get_current_ua(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_current()? * 1e6)
    }

    pub fn get_power_uw(&mut self) -> Result<f32, INA226Error<I2C::Error>> {
        Ok(self.get_power()? * 1e6)
    }

    // Conversion ready

    pub fn is_conversion_ready(&mut self) -> Result<bool, INA226Error<I2C::Error>> {
        Ok(self.get_alert_flags()?.contains(AlertFlags::CONVERSION_READY))
    }

    /// Waits for the current conversion cycle with a timeout estimated from the last written
    /// configuration, see [`Configuration::conversion_timeout_ms`].
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_conversion_ready(&mut self) -> Result<bool, INA226Error<I2C::Error>> {
        if self.is_conversion_ready()? {
            return Ok(true);
        }
        let timeout_ms = self.config.conversion_timeout_ms();
        self.poll_conversion_ready(timeout_ms)
    }

    /// Waits up to `timeout_ms` for the current conversion cycle. Returns `Ok(false)` on timeout.
    pub fn wait_conversion_ready_timeout(
        &mut self,
        timeout_ms: u32,
    ) -> Result<bool, INA226Error<I2C::Error>> {
        self.poll_conversion_ready(timeout_ms)
    }

    fn poll_conversion_ready(&mut self, timeout_ms: u32) -> Result<bool, INA226Error<I2C::Error>> {
        let mut elapsed_ms = 0u32;
        loop {
            if self.is_conversion_ready()? {
                return Ok(true);
            }
            if elapsed_ms > timeout_ms {
                break;
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
            elapsed_ms = elapsed_ms.saturating_add(POLL_INTERVAL_MS);
        }

        #[cfg(feature = "defmt")]
        defmt::warn!("INA226 conversion not ready after {=u32} ms", timeout_ms);

        Ok(false)
    }

    // Configuration

    /// Resets all registers to their power-on values. Calibration is lost.
    pub fn reset(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        let reg = self.read16(Register::Configuration)?;
        self.write16(Register::Configuration, reg | CONFIGURATION_RESET)?;
        self.config = Configuration::default();
        self.calibration = Calibration::UNCALIBRATED;
        Ok(())
    }

    /// Reads the whole configuration register.
    pub fn get_configuration(&mut self) -> Result<Configuration, INA226Error<I2C::Error>> {
        self.config = Configuration::from_bits(self.read16(Register::Configuration)?);
        Ok(self.config)
    }

    pub fn set_configuration(
        &mut self,
        config: Configuration,
    ) -> Result<(), INA226Error<I2C::Error>> {
        self.write16(Register::Configuration, config.bits())?;
        self.config = config;
        Ok(())
    }

    pub fn set_average(&mut self, averaging: Averaging) -> Result<(), INA226Error<I2C::Error>> {
        self.write_config_field(configuration::AVERAGING, averaging as u16)?;
        self.config.averaging = averaging;
        Ok(())
    }

    pub fn get_average(&mut self) -> Result<Averaging, INA226Error<I2C::Error>> {
        let bits = self.read_config_field(configuration::AVERAGING)?;
        self.config.averaging = Averaging::try_from(bits)?;
        Ok(self.config.averaging)
    }

    pub fn set_bus_voltage_conversion_time(
        &mut self,
        time: ConversionTime,
    ) -> Result<(), INA226Error<I2C::Error>> {
        self.write_config_field(configuration::BUS_CONVERSION_TIME, time as u16)?;
        self.config.bus_conversion_time = time;
        Ok(())
    }

    pub fn get_bus_voltage_conversion_time(
        &mut self,
    ) -> Result<ConversionTime, INA226Error<I2C::Error>> {
        let bits = self.read_config_field(configuration::BUS_CONVERSION_TIME)?;
        self.config.bus_conversion_time = ConversionTime::try_from(bits)?;
        Ok(self.config.bus_conversion_time)
    }

    pub fn set_shunt_voltage_conversion_time(
        &mut self,
        time: ConversionTime,
    ) -> Result<(), INA226Error<I2C::Error>> {
        self.write_config_field(configuration::SHUNT_CONVERSION_TIME, time as u16)?;
        self.config.shunt_conversion_time = time;
        Ok(())
    }

    pub fn get_shunt_voltage_conversion_time(
        &mut self,
    ) -> Result<ConversionTime, INA226Error<I2C::Error>> {
        let bits = self.read_config_field(configuration::SHUNT_CONVERSION_TIME)?;
        self.config.shunt_conversion_time = ConversionTime::try_from(bits)?;
        Ok(self.config.shunt_conversion_time)
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), INA226Error<I2C::Error>> {
        self.write_config_field(configuration::MODE, mode as u16)?;
        self.config.mode = mode;
        Ok(())
    }

    pub fn get_mode(&mut self) -> Result<Mode, INA226Error<I2C::Error>> {
        let bits = self.read_config_field(configuration::MODE)?;
        self.config.mode = Mode::try_from(bits)?;
        Ok(self.config.mode)
    }

    pub fn shut_down(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        self.set_mode(Mode::PowerDown)
    }

    pub fn set_mode_shunt_trigger(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        self.set_mode(Mode::ShuntTriggered)
    }

    pub fn set_mode_bus_trigger(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        self.set_mode(Mode::BusTriggered)
    }

    pub fn set_mode_shunt_bus_trigger(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        self.set_mode(Mode::ShuntBusTriggered)
    }

    pub fn set_mode_shunt_continuous(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        self.set_mode(Mode::ShuntContinuous)
    }

    pub fn set_mode_bus_continuous(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        self.set_mode(Mode::BusContinuous)
    }

    pub fn set_mode_shunt_bus_continuous(&mut self) -> Result<(), INA226Error<I2C::Error>> {
        self.set_mode(Mode::ShuntBusContinuous)
    }

    /// Configuration as last written or read, without touching the bus.
    pub fn cached_configuration(&self) -> Configuration {
        self.config
    }

    fn read_config_field(&mut self, field: Field) -> Result<u8, INA226Error<I2C::Error>> {
        Ok(field.extract(self.read16(Register::Configuration)?) as u8)
    }

    fn write_config_field(
        &mut self,
        field: Field,
        value: u16,
    ) -> Result<(), INA226Error<I2C::Error>> {
        let reg = self.read16(Register::Configuration)?;
        self.write16(Register::Configuration, field.insert(reg, value))
    }

    // Calibration

    ///
    ///
    /// # Arguments
    ///
    /// * `max_current`: Largest current expected through the shunt, in amperes. At least 1 mA.
    /// * `shunt`: Shunt resistance in ohms. At least 1 mΩ.
    /// * `normalize`: Round the current LSB up to 1, 2 or 5 × 10^n µA.
    ///
    /// `max_current * shunt` must not exceed 80 mV. On any error the previous calibration
    /// stays active, except for a failed normalization which leaves the driver uncalibrated.
    ///
    /// returns: Result<Calibration, INA226Error<<I2C as ErrorType>::Error>>
    pub fn set_max_current_shunt(
        &mut self,
        max_current: f32,
        shunt: f32,
        normalize: bool,
    ) -> Result<Calibration, INA226Error<I2C::Error>> {
        let value = match calibration::compute(max_current, shunt, normalize) {
            Ok(value) => value,
            Err(err) => {
                if err == CalibrationError::NormalizeFailed {
                    self.calibration = Calibration::UNCALIBRATED;
                }
                #[cfg(feature = "defmt")]
                defmt::warn!("INA226 calibration rejected: {}", err);
                return Err(err.into());
            }
        };

        self.write16(Register::Calibration, value.register)?;
        self.calibration = value.into_calibration(shunt);

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "INA226 calibrated: register {=u16}, current LSB {=f32} A, max current {=f32} A",
            value.register,
            self.calibration.current_lsb,
            self.calibration.max_current
        );

        Ok(self.calibration)
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated()
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn get_current_lsb(&self) -> f32 {
        self.calibration.current_lsb
    }

    pub fn get_current_lsb_ma(&self) -> f32 {
        self.calibration.current_lsb * 1e3
    }

    pub fn get_current_lsb_ua(&self) -> f32 {
        self.calibration.current_lsb * 1e6
    }

    pub fn get_shunt(&self) -> f32 {
        self.calibration.shunt
    }

    pub fn get_max_current(&self) -> f32 {
        self.calibration.max_current
    }

    // Alert

    /// Selects the alert function. Status bits in the low half are not written.
    pub fn set_alert_register(&mut self, mask: AlertMask) -> Result<(), INA226Error<I2C::Error>> {
        self.write16(Register::MaskEnable, mask.bits() & ALERT_MASK_BITS)
    }

    pub fn get_alert_flags(&mut self) -> Result<AlertFlags, INA226Error<I2C::Error>> {
        let reg = self.read16(Register::MaskEnable)?;
        Ok(AlertFlags::from_bits_truncate(reg & ALERT_FLAG_BITS))
    }

    /// Raw limit, in the LSB of the register the selected alert function compares against.
    pub fn set_alert_limit(&mut self, limit: u16) -> Result<(), INA226Error<I2C::Error>> {
        self.write16(Register::AlertLimit, limit)
    }

    pub fn get_alert_limit(&mut self) -> Result<u16, INA226Error<I2C::Error>> {
        self.read16(Register::AlertLimit)
    }

    // Identification

    pub fn manufacturer_id(&mut self) -> Result<u16, INA226Error<I2C::Error>> {
        self.read16(Register::ManufacturerId)
    }

    pub fn die_id(&mut self) -> Result<u16, INA226Error<I2C::Error>> {
        self.read16(Register::DieId)
    }

    // Register transport

    pub fn write16(
        &mut self,
        register: Register,
        data: u16,
    ) -> Result<(), INA226Error<I2C::Error>> {
        let [high, low] = data.to_be_bytes();
        self.i2c
            .write(self.address, &[register as u8, high, low])
            .map_err(INA226Error::I2c)
    }

    pub fn read16(&mut self, register: Register) -> Result<u16, INA226Error<I2C::Error>> {
        let mut read_buffer = [0u8; 2];
        self.i2c
            .write(self.address, &[register as u8])
            .map_err(INA226Error::I2c)?;
        self.i2c
            .read(self.address, &mut read_buffer)
            .map_err(INA226Error::I2c)?;

        Ok(u16::from_be_bytes(read_buffer))
    }
}

#[cfg(feature = "std")]
impl<I2C> std::fmt::Display for INA226Error<I2C>
where
    I2C: std::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            INA226Error::I2c(i2c) => write!(f, "I2C Error: {i2c:?}"),
            INA226Error::Connect => write!(f, "Unable to connect to INA226"),
            INA226Error::Calibration(err) => write!(f, "Calibration Error: {err}"),
            INA226Error::InvalidArgument => write!(f, "Invalid Argument"),
        }
    }
}

#[cfg(feature = "std")]
impl<I2C> std::error::Error for INA226Error<I2C>
where
    I2C: std::fmt::Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            INA226Error::Calibration(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::CONFIGURATION_DEFAULT;
    use embedded_hal::i2c::{ErrorType, Operation};

    const ADDRESS: u8 = 0x40;

    /// Register file behind an I2C address, with a register pointer like the real device.
    struct MockI2c {
        registers: [u16; 256],
        pointer: u8,
        present: bool,
        fail_writes: bool,
        /// Reads of the mask/enable register before the conversion ready flag comes up
        ready_after: Option<u32>,
        mask_reads: u32,
        writes: Vec<(u8, u16)>,
    }

    impl Default for MockI2c {
        fn default() -> Self {
            let mut registers = [0u16; 256];
            registers[Register::Configuration as usize] = CONFIGURATION_DEFAULT;
            registers[Register::ManufacturerId as usize] = MANUFACTURER_ID;
            registers[Register::DieId as usize] = DIE_ID;
            Self {
                registers,
                pointer: 0,
                present: true,
                fail_writes: false,
                ready_after: Some(0),
                mask_reads: 0,
                writes: Vec::new(),
            }
        }
    }

    impl MockI2c {
        fn with_reg(mut self, register: Register, value: u16) -> Self {
            self.registers[register as usize] = value;
            self
        }

        fn reg(&self, register: Register) -> u16 {
            self.registers[register as usize]
        }

        fn read_pointer(&mut self) -> u16 {
            if self.pointer == Register::MaskEnable as u8 {
                let ready = matches!(self.ready_after, Some(n) if self.mask_reads >= n);
                self.mask_reads += 1;
                let flag = AlertFlags::CONVERSION_READY.bits();
                let reg = self.registers[self.pointer as usize] & !flag;
                return if ready { reg | flag } else { reg };
            }
            self.registers[self.pointer as usize]
        }

        fn write_pointer(&mut self, value: u16) {
            self.writes.push((self.pointer, value));
            if self.pointer == Register::Configuration as u8 && value & CONFIGURATION_RESET != 0 {
                self.registers = Self::default().registers;
                return;
            }
            self.registers[self.pointer as usize] = value;
        }
    }

    impl ErrorType for MockI2c {
        type Error = ErrorKind;
    }

    impl I2c for MockI2c {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if !self.present || address != ADDRESS {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => match &bytes[..] {
                        [] => {}
                        [pointer] => self.pointer = *pointer,
                        [pointer, high, low] => {
                            if self.fail_writes {
                                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                            }
                            self.pointer = *pointer;
                            self.write_pointer(u16::from_be_bytes([*high, *low]));
                        }
                        _ => return Err(ErrorKind::Other),
                    },
                    Operation::Read(buffer) => {
                        let value = self.read_pointer().to_be_bytes();
                        let len = buffer.len();
                        buffer.copy_from_slice(&value[..len]);
                    }
                }
            }
            Ok(())
        }
    }

    /// Counts delayed time instead of sleeping.
    #[derive(Default)]
    struct MockDelay {
        elapsed_ns: u64,
    }

    impl MockDelay {
        fn elapsed_ms(&self) -> u64 {
            self.elapsed_ns / 1_000_000
        }
    }

    impl DelayNs for MockDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.elapsed_ns += ns as u64;
        }

        fn delay_ms(&mut self, ms: u32) {
            self.elapsed_ns += ms as u64 * 1_000_000;
        }
    }

    fn driver(i2c: MockI2c) -> INA226Driver<MockI2c, MockDelay> {
        INA226Driver::new(i2c, MockDelay::default(), ADDRESS, None).unwrap()
    }

    #[test]
    fn read16_is_big_endian() {
        let mut ina = driver(MockI2c::default().with_reg(Register::AlertLimit, 0x1234));
        assert_eq!(ina.read16(Register::AlertLimit).unwrap(), 0x1234);
        assert_eq!(ina.manufacturer_id().unwrap(), 0x5449);
        assert_eq!(ina.die_id().unwrap(), 0x2260);
    }

    #[test]
    fn write16_sends_pointer_then_data() {
        let mut ina = driver(MockI2c::default());
        ina.set_alert_limit(0xABCD).unwrap();
        assert_eq!(ina.i2c.writes, vec![(Register::AlertLimit as u8, 0xABCD)]);
        assert_eq!(ina.get_alert_limit().unwrap(), 0xABCD);
    }

    #[test]
    fn bus_errors_are_returned_not_retried() {
        let mut i2c = MockI2c::default();
        i2c.fail_writes = true;
        let mut ina = driver(i2c);
        assert_eq!(
            ina.set_alert_limit(1),
            Err(INA226Error::I2c(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)))
        );
        assert!(ina.i2c.writes.is_empty());
    }

    #[test]
    fn is_connected_reports_missing_device() {
        let mut ina = driver(MockI2c::default());
        assert_eq!(ina.is_connected(), Ok(true));
        ina.i2c.present = false;
        assert_eq!(ina.is_connected(), Ok(false));
    }

    #[test]
    fn init_config_checks_identity() {
        let i2c = MockI2c::default().with_reg(Register::DieId, 0x2270);
        let result = INA226Driver::new(
            i2c,
            MockDelay::default(),
            ADDRESS,
            Some(INA226InitConfig::default()),
        );
        assert!(matches!(result, Err(INA226Error::Connect)));
    }

    #[test]
    fn init_config_programs_device() {
        let config = Configuration {
            averaging: Averaging::Samples16,
            bus_conversion_time: ConversionTime::Us588,
            shunt_conversion_time: ConversionTime::Us2116,
            mode: Mode::ShuntBusTriggered,
        };
        let ina = INA226Driver::new(
            MockI2c::default(),
            MockDelay::default(),
            ADDRESS,
            Some(INA226InitConfig {
                configuration: config,
                ..Default::default()
            }),
        )
        .unwrap();

        assert_eq!(ina.cached_configuration(), config);
        assert!(ina.is_calibrated());
        assert_eq!(ina.i2c.reg(Register::Configuration), config.bits());
        assert_eq!(ina.i2c.reg(Register::Calibration), 2560);
    }

    #[test]
    fn bus_voltage_conversion() {
        let mut ina = driver(MockI2c::default().with_reg(Register::BusVoltage, 0x1000));
        let volts = ina.get_bus_voltage().unwrap();
        assert!((volts - 5.12).abs() < 1e-5);
        assert!((ina.get_bus_voltage_mv().unwrap() - 5120.0).abs() < 1e-2);
    }

    #[test]
    fn shunt_voltage_is_signed() {
        let mut ina = driver(MockI2c::default().with_reg(Register::ShuntVoltage, 0xFFFF));
        let volts = ina.get_shunt_voltage().unwrap();
        assert!((volts + 2.5e-6).abs() < 1e-12);
        assert!((ina.get_shunt_voltage_uv().unwrap() + 2.5).abs() < 1e-4);
    }

    #[test]
    fn current_and_power_are_zero_until_calibrated() {
        let mut ina = driver(
            MockI2c::default()
                .with_reg(Register::Current, 0x1234)
                .with_reg(Register::Power, 0x4321),
        );
        assert!(!ina.is_calibrated());
        assert_eq!(ina.get_current().unwrap(), 0.0);
        assert_eq!(ina.get_power().unwrap(), 0.0);
    }

    #[test]
    fn current_and_power_use_calibrated_lsb() {
        let mut ina = driver(
            MockI2c::default()
                .with_reg(Register::Current, (-1000i16) as u16)
                .with_reg(Register::Power, 400),
        );
        ina.set_max_current_shunt(20.0, 0.002, true).unwrap();

        // 1 mA/bit, 25 mW/bit
        assert!((ina.get_current().unwrap() + 1.0).abs() < 1e-4);
        assert!((ina.get_current_ma().unwrap() + 1000.0).abs() < 1e-1);
        assert!((ina.get_power().unwrap() - 10.0).abs() < 1e-4);
        assert!((ina.get_power_mw().unwrap() - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn calibration_writes_register_and_state() {
        let mut ina = driver(MockI2c::default());
        let calibration = ina.set_max_current_shunt(20.0, 0.002, true).unwrap();

        assert_eq!(ina.i2c.reg(Register::Calibration), 2560);
        assert_eq!(calibration, ina.calibration());
        assert!((ina.get_current_lsb_ma() - 1.0).abs() < 1e-5);
        assert!((ina.get_max_current() - 32.768).abs() < 1e-4);
        assert_eq!(ina.get_shunt(), 0.002);
    }

    #[test]
    fn rejected_calibration_keeps_previous_state() {
        let mut ina = driver(MockI2c::default());
        assert_eq!(
            ina.set_max_current_shunt(1.0, 0.0005, true),
            Err(INA226Error::Calibration(CalibrationError::ShuntTooLow))
        );
        assert_eq!(ina.get_current_lsb(), 0.0);
        assert!(ina.i2c.writes.is_empty());

        let before = ina.set_max_current_shunt(20.0, 0.002, true).unwrap();
        assert_eq!(
            ina.set_max_current_shunt(100.0, 0.002, true),
            Err(INA226Error::Calibration(CalibrationError::ShuntVoltageTooHigh))
        );
        assert_eq!(ina.calibration(), before);
    }

    #[test]
    fn failed_calibration_write_keeps_previous_state() {
        let mut ina = driver(MockI2c::default());
        ina.i2c.fail_writes = true;
        assert!(matches!(
            ina.set_max_current_shunt(20.0, 0.002, true),
            Err(INA226Error::I2c(_))
        ));
        assert!(!ina.is_calibrated());
        assert_eq!(ina.get_max_current(), 0.0);
    }

    #[test]
    fn set_average_round_trips() {
        let mut ina = driver(MockI2c::default());
        ina.set_average(Averaging::try_from(3).unwrap()).unwrap();

        assert_eq!(ina.i2c.reg(Register::Configuration), 0x4727);
        assert_eq!(ina.get_average().unwrap().sample_count(), 64);
        assert_eq!(ina.cached_configuration().averaging, Averaging::Samples64);
    }

    #[test]
    fn field_setters_leave_other_fields() {
        let mut ina = driver(MockI2c::default());
        ina.set_bus_voltage_conversion_time(ConversionTime::Us140).unwrap();
        ina.set_shunt_voltage_conversion_time(ConversionTime::Us8244).unwrap();
        ina.set_mode_bus_trigger().unwrap();

        assert_eq!(ina.get_bus_voltage_conversion_time().unwrap(), ConversionTime::Us140);
        assert_eq!(ina.get_shunt_voltage_conversion_time().unwrap(), ConversionTime::Us8244);
        assert_eq!(ina.get_mode().unwrap(), Mode::BusTriggered);
        assert_eq!(ina.get_average().unwrap(), Averaging::Samples1);
    }

    #[test]
    fn failed_write_does_not_touch_cache() {
        let mut ina = driver(MockI2c::default());
        ina.i2c.fail_writes = true;
        assert!(ina.set_mode(Mode::PowerDown).is_err());
        assert!(ina.set_average(Averaging::Samples1024).is_err());
        assert_eq!(ina.cached_configuration(), Configuration::default());
    }

    #[test]
    fn getters_resync_cache_from_device() {
        let mut ina = driver(MockI2c::default());
        // changed behind the driver's back
        ina.i2c.registers[Register::Configuration as usize] = 0x4E05;
        assert_eq!(ina.get_mode().unwrap(), Mode::ShuntContinuous);
        assert_eq!(ina.cached_configuration().mode, Mode::ShuntContinuous);
        assert_eq!(ina.cached_configuration().averaging, Averaging::Samples1);

        let config = ina.get_configuration().unwrap();
        assert_eq!(config.averaging, Averaging::Samples1024);
        assert_eq!(ina.cached_configuration(), config);
    }

    #[test]
    fn reset_restores_defaults_and_drops_calibration() {
        let mut ina = driver(MockI2c::default());
        ina.set_average(Averaging::Samples256).unwrap();
        ina.set_max_current_shunt(20.0, 0.002, true).unwrap();

        ina.reset().unwrap();

        assert!(!ina.is_calibrated());
        assert_eq!(ina.cached_configuration(), Configuration::default());
        assert_eq!(ina.i2c.reg(Register::Configuration), CONFIGURATION_DEFAULT);
        assert_eq!(ina.i2c.reg(Register::Calibration), 0);
    }

    #[test]
    fn alert_register_writes_only_enable_bits() {
        let mut ina = driver(MockI2c::default());
        let mask = AlertMask::from_bits_retain(AlertMask::BUS_OVER_VOLTAGE.bits() | 0x0003);
        ina.set_alert_register(mask).unwrap();
        assert_eq!(ina.i2c.reg(Register::MaskEnable), 0x2000);
    }

    #[test]
    fn alert_flags_read_low_bits() {
        let mut i2c = MockI2c::default().with_reg(Register::MaskEnable, 0x2014);
        i2c.ready_after = None;
        let mut ina = driver(i2c);
        assert_eq!(
            ina.get_alert_flags().unwrap(),
            AlertFlags::ALERT_FUNCTION | AlertFlags::MATH_OVERFLOW
        );
    }

    #[test]
    fn ready_on_first_poll_does_not_wait() {
        let mut ina = driver(MockI2c::default());
        assert!(ina.is_conversion_ready().unwrap());
        assert!(ina.wait_conversion_ready().unwrap());
        assert!(ina.wait_conversion_ready_timeout(100).unwrap());
        assert_eq!(ina.delay.elapsed_ms(), 0);
    }

    #[test]
    fn ready_after_a_few_polls() {
        let mut i2c = MockI2c::default();
        i2c.ready_after = Some(3);
        let mut ina = driver(i2c);
        assert!(ina.wait_conversion_ready_timeout(10).unwrap());
        assert_eq!(ina.delay.elapsed_ms(), 3);
    }

    #[test]
    fn supplied_timeout_elapses_when_never_ready() {
        let mut i2c = MockI2c::default();
        i2c.ready_after = None;
        let mut ina = driver(i2c);
        assert!(!ina.wait_conversion_ready_timeout(20).unwrap());
        assert!(ina.delay.elapsed_ms() > 20);
        assert!(ina.delay.elapsed_ms() <= 21);
    }

    #[test]
    fn estimated_timeout_follows_cached_configuration() {
        let mut i2c = MockI2c::default();
        i2c.ready_after = None;
        let mut ina = driver(i2c);
        ina.set_average(Averaging::Samples4).unwrap();
        ina.set_mode_shunt_continuous().unwrap();

        // 4 × 1100 us shunt only -> 4.62 ms -> 5 ms + 2 ms
        let timeout = ina.cached_configuration().conversion_timeout_ms();
        assert_eq!(timeout, 7);

        assert!(!ina.wait_conversion_ready().unwrap());
        assert_eq!(ina.delay.elapsed_ms(), timeout as u64 + 1);
    }
}
