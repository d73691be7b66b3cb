//! Hardware Access Facade.
//!
//! The core never touches pins or buses directly; it calls these traits.
//! Firmware implementations live next to the embedded tasks (`outputs`,
//! `sensor`, `battery`), host tests use recording fakes.

use crate::error::HardwareError;

/// Raw burst buffer size for one multi-channel sensor read.
pub const RAW_BUFFER_LEN: usize = 32;

/// Raw bytes returned by one multi-channel sensor read.
pub type RawBuffer = [u8; RAW_BUFFER_LEN];

/// Sensor channel to decode out of a raw burst.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    AmbientTemperature,
    Pressure,
    Humidity,
}

/// Fixed-point reading: Q31 mantissa scaled by `2^shift`.
///
/// The represented value is `value / 2^(31 - shift)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedPointSample {
    pub value: i32,
    pub shift: i8,
}

/// Digital output lines (LEDs / relays).
pub trait DigitalOutputs {
    /// Drive `line` high (`true`) or low.
    fn set_line(&mut self, line: u8, on: bool) -> Result<(), HardwareError>;
}

/// Multi-channel environmental sensor.
pub trait EnvironmentSensor {
    /// Whether the device is present and initialised.
    fn is_ready(&self) -> bool;

    /// Synchronous burst read of all configured channels into `buf`.
    fn read_burst(&mut self, buf: &mut RawBuffer) -> Result<(), HardwareError>;

    /// Obtain or refresh the decoder for this sensor instance.
    fn refresh_decoder(&mut self) -> Result<(), HardwareError>;

    /// Decode one channel out of a raw burst.
    fn decode(&self, buf: &RawBuffer, channel: Channel) -> Result<FixedPointSample, HardwareError>;
}

/// Battery voltage to state-of-charge calibration.
pub trait BatteryGauge {
    fn percentage(&self, millivolt: u16) -> Result<u8, HardwareError>;
}

/// Charger presence input.
pub trait ChargerProbe {
    fn is_charger_connected(&self) -> bool;
}
