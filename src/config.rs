//! Application-wide constants and compile-time configuration.
//!
//! All hardware pin assignments, timing parameters, and protocol
//! constants live here so they can be tuned in one place.

// BLE

/// Complete local name carried in the scan response.
pub const DEVICE_NAME: &str = "envnode";

/// Delay after which fast advertising falls back to the slow interval (ms).
pub const ADV_RATE_REDUCTION_DELAY_MS: u64 = 30_000;

/// Fast advertising interval range (in 0.625 ms units). 48 = 30 ms, 96 = 60 ms.
pub const ADV_FAST_INTERVAL_MIN: u32 = 48;
pub const ADV_FAST_INTERVAL_MAX: u32 = 96;

/// Slow advertising interval range (in 0.625 ms units). 1600 = 1 s, 1920 = 1.2 s.
pub const ADV_SLOW_INTERVAL_MIN: u32 = 1600;
pub const ADV_SLOW_INTERVAL_MAX: u32 = 1920;

/// Maximum number of peers tracked in the subscription table.
pub const MAX_PEERS: usize = 2;

/// BLE connection interval range requested from the central (in 1.25 ms units).
/// 24 = 30 ms, 40 = 50 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// BLE peripheral latency (connection events the peripheral may skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

// Sensors

/// Environmental sampling cadence (ms).
pub const SAMPLING_INTERVAL_MS: u64 = 5_000;

/// Battery voltage sampling cadence (ms).
pub const BATTERY_SAMPLING_INTERVAL_MS: u64 = 5_000;

/// BME280 I²C address (SDO tied low).
pub const BME280_I2C_ADDR: u8 = 0x76;

/// Ratio of the battery voltage divider feeding the SAADC (VBAT / VADC).
/// 1 MΩ / 510 kΩ on the XIAO nRF52840.
pub const BATTERY_DIVIDER_NUM: u32 = 1510;
pub const BATTERY_DIVIDER_DEN: u32 = 510;

// Digital outputs

/// Number of digital output lines exposed over Automation IO.
pub const NUM_OF_DIGITALS: u8 = 3;

// GPIO pin assignments (nRF52840-DK defaults)
//
// These are logical names; actual `embassy_nrf::peripherals::*` types are
// selected in `main.rs`.  Adjust for your custom PCB.
//
//   Digital 0 (LED1)   → P0.13
//   Digital 1 (LED2)   → P0.14
//   Digital 2 (LED3)   → P0.15
//   I²C SDA (BME280)   → P0.26
//   I²C SCL (BME280)   → P0.27
//   VBAT sense (AIN2)  → P0.04
//   Charger STAT       → P0.17 (active low)
//   Fast-charge enable → P0.16 (active low)
