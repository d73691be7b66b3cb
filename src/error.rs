//! Unified error type for envnode.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // BLE
    /// Broadcast or connection operation failed at the stack level.
    Transport(TransportError),

    // Attribute requests
    /// Peer request used an offset past the end of the value.
    InvalidOffset,

    /// Peer write payload does not match the attribute width.
    InvalidLength,

    /// Peer tried to write a read-only attribute.
    WriteNotPermitted,

    // Hardware
    /// Sensor read/decode or output drive failed.
    Hardware(HardwareError),

    /// Sensor or battery hardware missing or not ready at startup.
    DeviceNotReady,
}

/// Stack-level failures (keeps the enum `Copy`-friendly).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// GATT service registration failed.
    Init,
    /// Advertising could not start (stack busy, no free advertising set).
    AdvertisingStart,
    /// Advertising ended with an error after it had started.
    AdvertisingAborted,
    /// Notification could not be queued.
    NotifyFailed,
}

/// Hardware facade failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HardwareError {
    /// Bus transaction to the sensor failed.
    SensorRead,
    /// Decoder for the sensor instance unavailable.
    Decoder,
    /// A channel could not be decoded from the raw buffer.
    Decode,
    /// A digital output line could not be driven.
    OutputDrive,
    /// Battery voltage could not be sampled.
    BatteryRead,
    /// Millivolt reading could not be mapped to a percentage.
    Calibration,
}

/// ATT protocol error returned to the peer for a rejected request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AttError {
    WriteNotPermitted = 0x03,
    InvalidOffset = 0x07,
    InvalidAttributeValueLength = 0x0D,
    UnlikelyError = 0x0E,
}

impl AttError {
    /// Raw ATT error code carried in the Error Response PDU.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// Convenience conversions

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<HardwareError> for Error {
    fn from(e: HardwareError) -> Self {
        Error::Hardware(e)
    }
}

impl From<Error> for AttError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidOffset => AttError::InvalidOffset,
            Error::InvalidLength => AttError::InvalidAttributeValueLength,
            Error::WriteNotPermitted => AttError::WriteNotPermitted,
            Error::Transport(_) | Error::Hardware(_) | Error::DeviceNotReady => {
                AttError::UnlikelyError
            }
        }
    }
}
