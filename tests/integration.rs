//! Integration tests for envnode host-testable logic.

use envnode::attributes::{AttributeHandle, AttributeTable, DIGITAL_LINE_MAP};
use envnode::battery::curve::lipo_percentage;
use envnode::battery::ChargeFilter;
use envnode::ble::adv_data::{advertising_data, scan_response_data, ADVERTISED_SERVICES};
use envnode::ble::{
    AdvMode, AdvertisingPort, AdvertisingState, AdvertisingStateMachine, LinkEvent, TimerToken,
};
use envnode::config::{DEVICE_NAME, NUM_OF_DIGITALS};
use envnode::error::{Error, HardwareError, TransportError};
use envnode::hal::{DigitalOutputs, FixedPointSample};
use envnode::sensor::fixed_point::to_centi;
use proptest::prelude::*;

#[derive(Default)]
struct Radio {
    mode: Option<AdvMode>,
    timer: Option<TimerToken>,
    starts: usize,
}

impl AdvertisingPort for Radio {
    fn start_advertising(&mut self, mode: AdvMode) -> Result<(), TransportError> {
        self.mode = Some(mode);
        self.starts += 1;
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.mode = None;
    }

    fn arm_rate_timer(&mut self, _delay_ms: u64, token: TimerToken) {
        self.timer = Some(token);
    }

    fn cancel_rate_timer(&mut self) {
        self.timer = None;
    }
}

#[derive(Default)]
struct Lines([bool; 3]);

impl DigitalOutputs for Lines {
    fn set_line(&mut self, line: u8, on: bool) -> Result<(), HardwareError> {
        self.0[usize::from(line)] = on;
        Ok(())
    }
}

#[test]
fn full_connection_cycle() {
    let mut radio = Radio::default();
    let mut sm = AdvertisingStateMachine::new();

    sm.handle(&mut radio, LinkEvent::Ready(None));
    assert_eq!(sm.state(), AdvertisingState::FastAdvertising);
    let first = radio.timer.expect("rate timer armed");

    sm.handle(&mut radio, LinkEvent::RateTimerFired(first));
    assert_eq!(sm.state(), AdvertisingState::SlowAdvertising);
    assert_eq!(radio.mode, Some(AdvMode::Slow));

    sm.handle(&mut radio, LinkEvent::Connected { peer: 3, error: None });
    assert_eq!(sm.state(), AdvertisingState::Suspended { peer: 3 });

    sm.handle(&mut radio, LinkEvent::Disconnected { peer: 3, reason: 0x13 });
    sm.handle(&mut radio, LinkEvent::Recycled);
    assert_eq!(sm.state(), AdvertisingState::FastAdvertising);
    assert_eq!(radio.mode, Some(AdvMode::Fast));
    assert_ne!(radio.timer, Some(first));

    // A late fire of the first timer changes nothing.
    sm.handle(&mut radio, LinkEvent::RateTimerFired(first));
    assert_eq!(sm.state(), AdvertisingState::FastAdvertising);
    assert_eq!(radio.starts, 3);
}

#[test]
fn advertised_payloads_fit() {
    let adv = advertising_data(&ADVERTISED_SERVICES).unwrap();
    let sr = scan_response_data(DEVICE_NAME).unwrap();
    assert!(adv.len() <= 31);
    assert_eq!(&sr[2..], DEVICE_NAME.as_bytes());
}

#[test]
fn number_of_digitals_is_read_only() {
    let mut table = AttributeTable::new();
    let mut lines = Lines::default();

    assert_eq!(
        table
            .read(AttributeHandle::NumberOfDigitals, 0)
            .unwrap()
            .as_slice(),
        &[NUM_OF_DIGITALS]
    );
    assert_eq!(
        table.write(AttributeHandle::NumberOfDigitals, 0, &[5], &mut lines),
        Err(Error::WriteNotPermitted)
    );
}

proptest! {
    #[test]
    fn digital_lines_follow_sparse_bits(mask in any::<u8>()) {
        let mut table = AttributeTable::new();
        let mut lines = Lines::default();
        table.write(AttributeHandle::DigitalOutput, 0, &[mask], &mut lines).unwrap();

        for (bit, line) in DIGITAL_LINE_MAP {
            prop_assert_eq!(lines.0[usize::from(line)], mask & bit != 0);
        }
        prop_assert_eq!(table.digital_output(), mask);
    }

    #[test]
    fn wrong_length_writes_change_nothing(payload in proptest::collection::vec(any::<u8>(), 2..8)) {
        let mut table = AttributeTable::new();
        let mut lines = Lines([true, true, true]);
        prop_assert_eq!(
            table.write(AttributeHandle::DigitalOutput, 0, &payload, &mut lines),
            Err(Error::InvalidLength)
        );
        prop_assert_eq!(lines.0, [true, true, true]);
        prop_assert_eq!(table.digital_output(), 0);
    }

    #[test]
    fn charging_output_never_decreases(samples in proptest::collection::vec(3000u16..4300, 1..32)) {
        let mut filter = ChargeFilter::new(true);
        let mut last = 0;
        for mv in samples {
            let out = filter.accept(mv);
            prop_assert!(out >= last);
            last = out;
        }
    }

    #[test]
    fn discharging_output_never_increases(samples in proptest::collection::vec(3000u16..4300, 1..32)) {
        let mut filter = ChargeFilter::new(false);
        let mut last = u16::MAX;
        for mv in samples {
            let out = filter.accept(mv);
            prop_assert!(out <= last);
            last = out;
        }
    }

    #[test]
    fn percentage_is_bounded(mv in any::<u16>()) {
        prop_assert!(lipo_percentage(mv) <= 100);
    }

    #[test]
    fn centi_truncates_toward_zero(value in any::<i32>(), shift in 0i8..8) {
        let exact = value as f64 * 100.0 / 2f64.powi(31 - i32::from(shift));
        let centi = to_centi(FixedPointSample { value, shift });
        if exact.abs() < f64::from(i16::MAX) {
            prop_assert_eq!(f64::from(centi), exact.trunc());
        }
    }
}
