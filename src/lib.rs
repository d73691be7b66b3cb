//! Host-testable core of the envnode BLE peripheral.
//!
//! Everything here is `no_std` and hardware-free: the attribute table,
//! the advertising state machine, advertising payloads, BME280
//! compensation, the sampling pipeline and battery filtering. Hardware is
//! reached only through the traits in [`hal`].
//!
//! Usage: `cargo test --lib`
//!
//! Note: The embedded binary (`main.rs`, feature `embedded`) adds the
//! SoftDevice, TWIM, SAADC and GPIO glue on top of this crate.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod attributes;
pub mod config;
pub mod error;
pub mod hal;

// ═══════════════════════════════════════════════════════════════════════════
// Module Re-exports
// ═══════════════════════════════════════════════════════════════════════════

pub mod ble {
    pub mod advertising {
        pub use crate::ble_advertising_impl::*;
    }
    pub mod adv_data {
        pub use crate::ble_adv_data_impl::*;
    }

    pub use advertising::{
        AdvMode, AdvertisingPort, AdvertisingState, AdvertisingStateMachine, LinkEvent, TimerToken,
    };
}

pub mod sensor {
    pub mod bme280 {
        pub use crate::sensor_bme280_impl::*;
    }
    pub mod fixed_point {
        pub use crate::sensor_fixed_point_impl::*;
    }
    pub mod sampling {
        pub use crate::sensor_sampling_impl::*;
    }

    pub use sampling::{environmental_service_start, SamplingPipeline};
}

pub mod battery {
    pub mod curve {
        pub use crate::battery_curve_impl::*;
    }
    pub mod filter {
        pub use crate::battery_filter_impl::*;
    }

    pub use filter::{BatteryMonitor, ChargeFilter};
}

// Internal module paths for the actual implementations
#[path = "ble/advertising.rs"]
mod ble_advertising_impl;
#[path = "ble/adv_data.rs"]
mod ble_adv_data_impl;

#[path = "sensor/bme280.rs"]
mod sensor_bme280_impl;
#[path = "sensor/fixed_point.rs"]
mod sensor_fixed_point_impl;
#[path = "sensor/sampling.rs"]
mod sensor_sampling_impl;

#[path = "battery/curve.rs"]
mod battery_curve_impl;
#[path = "battery/filter.rs"]
mod battery_filter_impl;

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests - services sharing one attribute table
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::attributes::{AttributeHandle, AttributeTable, Notifier, PeerId};
    use super::battery::curve::LipoGauge;
    use super::battery::BatteryMonitor;
    use super::error::{AttError, Error, HardwareError, TransportError};
    use super::hal::{Channel, DigitalOutputs, EnvironmentSensor, FixedPointSample, RawBuffer};
    use super::sensor::SamplingPipeline;

    const CENTRAL: PeerId = 0;

    #[derive(Default)]
    struct Lines {
        state: [bool; 3],
    }

    impl DigitalOutputs for Lines {
        fn set_line(&mut self, line: u8, on: bool) -> Result<(), HardwareError> {
            self.state[usize::from(line)] = on;
            Ok(())
        }
    }

    struct ConstantSensor;

    impl EnvironmentSensor for ConstantSensor {
        fn is_ready(&self) -> bool {
            true
        }

        fn read_burst(&mut self, _buf: &mut RawBuffer) -> Result<(), HardwareError> {
            Ok(())
        }

        fn refresh_decoder(&mut self) -> Result<(), HardwareError> {
            Ok(())
        }

        fn decode(&self, _buf: &RawBuffer, _channel: Channel) -> Result<FixedPointSample, HardwareError> {
            // 20.00 in every unit.
            Ok(FixedPointSample {
                value: 1_342_177_280,
                shift: 5,
            })
        }
    }

    #[derive(Default)]
    struct Log {
        sent: Vec<(PeerId, AttributeHandle, Vec<u8>)>,
        drop_all: bool,
    }

    impl Notifier for Log {
        fn notify(
            &mut self,
            peer: PeerId,
            handle: AttributeHandle,
            value: &[u8],
        ) -> Result<(), TransportError> {
            if self.drop_all {
                return Err(TransportError::NotifyFailed);
            }
            self.sent.push((peer, handle, value.to_vec()));
            Ok(())
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // Automation IO
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn write_then_read_digital_mask() {
        let mut table = AttributeTable::new();
        let mut lines = Lines::default();

        table
            .write(AttributeHandle::DigitalOutput, 0, &[0x11], &mut lines)
            .unwrap();

        assert_eq!(lines.state, [true, false, true]);
        assert_eq!(
            table.read(AttributeHandle::DigitalOutput, 0).unwrap().as_slice(),
            &[0x11]
        );
    }

    #[test]
    fn rejected_write_maps_to_att_code() {
        let mut table = AttributeTable::new();
        let mut lines = Lines::default();

        let err = table
            .write(AttributeHandle::DigitalOutput, 0, &[0x01, 0x00], &mut lines)
            .unwrap_err();
        assert_eq!(err, Error::InvalidLength);
        assert_eq!(AttError::from(err).code(), 0x0D);
        assert_eq!(table.digital_output(), 0);
    }

    #[test]
    fn digital_value_is_exactly_one_byte() {
        let mut table = AttributeTable::new();
        let mut lines = Lines::default();
        assert_eq!(AttributeHandle::DigitalOutput.width(), core::mem::size_of::<u8>());

        for mask in [0x00u8, 0x15, 0xFF] {
            table
                .write(AttributeHandle::DigitalOutput, 0, &[mask], &mut lines)
                .unwrap();
            assert_eq!(
                table.read(AttributeHandle::DigitalOutput, 0).unwrap().as_slice(),
                &[mask]
            );
        }
        assert_eq!(
            table.write(AttributeHandle::DigitalOutput, 0, &[0x01, 0x00, 0x00], &mut lines),
            Err(Error::InvalidLength)
        );
        assert_eq!(table.digital_output(), 0xFF);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Sampling + Battery publishing
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn sampling_and_battery_share_subscriptions() {
        let mut table = AttributeTable::new();
        table
            .set_subscription(AttributeHandle::Temperature, CENTRAL, true)
            .unwrap();
        table
            .set_subscription(AttributeHandle::BatteryLevel, CENTRAL, true)
            .unwrap();
        let mut log = Log::default();

        let mut pipeline = SamplingPipeline::new(5_000);
        let report = pipeline.run_cycle(&mut ConstantSensor, &mut table, &mut log);
        assert_eq!(report.next_in_ms, 5_000);

        let mut monitor = BatteryMonitor::new(false);
        assert_eq!(
            monitor.on_sample(4200, &LipoGauge, &mut table, &mut log),
            Some(100)
        );

        assert_eq!(
            log.sent,
            vec![
                (CENTRAL, AttributeHandle::Temperature, 2000i16.to_le_bytes().to_vec()),
                (CENTRAL, AttributeHandle::BatteryLevel, vec![100]),
            ]
        );
        assert_eq!(
            table.read(AttributeHandle::Humidity, 0).unwrap().as_slice(),
            &2000i16.to_le_bytes()
        );
    }

    #[test]
    fn notify_failures_do_not_block_caching() {
        let mut table = AttributeTable::new();
        for handle in AttributeHandle::ENVIRONMENTAL {
            table.set_subscription(handle, CENTRAL, true).unwrap();
        }
        let mut log = Log {
            drop_all: true,
            ..Log::default()
        };

        let mut pipeline = SamplingPipeline::new(5_000);
        let report = pipeline.run_cycle(&mut ConstantSensor, &mut table, &mut log);

        assert_eq!(report.next_in_ms, 5_000);
        assert!(log.sent.is_empty());
        assert_eq!(table.environmental(AttributeHandle::Pressure), Some(2000));
    }

    #[test]
    fn services_keep_caching_without_a_transport() {
        let mut table = AttributeTable::new();
        let mut log = Log {
            drop_all: true,
            ..Log::default()
        };

        let mut pipeline = SamplingPipeline::new(5_000);
        let report = pipeline.run_cycle(&mut ConstantSensor, &mut table, &mut log);
        let level = BatteryMonitor::new(false).on_sample(3700, &LipoGauge, &mut table, &mut log);

        assert_eq!(report.next_in_ms, 5_000);
        assert_eq!(table.environmental(AttributeHandle::Temperature), Some(2000));
        assert_eq!(level, Some(table.battery_level()));
        assert!(log.sent.is_empty());
    }

    #[test]
    fn disconnect_drops_subscriptions_for_all_services() {
        let mut table = AttributeTable::new();
        table
            .set_subscription(AttributeHandle::Pressure, CENTRAL, true)
            .unwrap();
        table
            .set_subscription(AttributeHandle::BatteryLevel, CENTRAL, true)
            .unwrap();

        table.drop_peer(CENTRAL);

        let mut log = Log::default();
        let mut pipeline = SamplingPipeline::new(5_000);
        pipeline.run_cycle(&mut ConstantSensor, &mut table, &mut log);
        BatteryMonitor::new(false).on_sample(3900, &LipoGauge, &mut table, &mut log);
        assert!(log.sent.is_empty());
    }
}
