//! Bluetooth Low Energy subsystem.
//!
//! This module drives the Nordic SoftDevice S140 in **Peripheral** role:
//!
//! 1. **Advertising loop** - runs the advertising state machine against
//!    the SoftDevice (fast, then slow after 30 s, restarted after each
//!    connection is recycled).
//! 2. **GATT server** - Automation IO, Environmental Sensing and Battery
//!    services backed by the shared attribute table.
//!
//! Sampling tasks publish through [`server::GattNotifier`]; the state
//! machine itself lives in `envnode::ble::advertising`.

pub mod peripheral;
pub mod server;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use envnode::attributes::AttributeTable;

/// Attribute table shared by the BLE, sampling and battery tasks.
pub type SharedTable = Mutex<CriticalSectionRawMutex, RefCell<AttributeTable>>;
