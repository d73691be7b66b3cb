//! Battery voltage debounce and level publication.
//!
//! While charging, a sample below the last accepted one is clamped up to
//! it; while discharging, a sample above it is clamped down. Either way the
//! reported voltage only moves in the direction the charger state allows,
//! which hides ADC jitter and load-induced dips from the battery level.

use crate::attributes::{AttributeHandle, AttributeTable, Notifier};
use crate::hal::BatteryGauge;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargeFilter {
    is_charging: bool,
    last_millivolt: Option<u16>,
}

impl ChargeFilter {
    pub const fn new(is_charging: bool) -> Self {
        Self {
            is_charging,
            last_millivolt: None,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.is_charging
    }

    pub fn last_millivolt(&self) -> Option<u16> {
        self.last_millivolt
    }

    /// Applies from the next sample on.
    pub fn set_charging(&mut self, is_charging: bool) {
        self.is_charging = is_charging;
    }

    /// The value `accept` would return, without remembering it.
    pub fn filtered(&self, raw_millivolt: u16) -> u16 {
        match self.last_millivolt {
            Some(last) if self.is_charging => raw_millivolt.max(last),
            Some(last) => raw_millivolt.min(last),
            None => raw_millivolt,
        }
    }

    /// Filter one raw sample and remember the result.
    pub fn accept(&mut self, raw_millivolt: u16) -> u16 {
        let accepted = self.filtered(raw_millivolt);
        self.last_millivolt = Some(accepted);
        accepted
    }
}

/// Battery service state: filter plus the published level.
#[derive(Debug, Default)]
pub struct BatteryMonitor {
    filter: ChargeFilter,
}

impl BatteryMonitor {
    pub const fn new(is_charging: bool) -> Self {
        Self {
            filter: ChargeFilter::new(is_charging),
        }
    }

    pub fn filter(&self) -> &ChargeFilter {
        &self.filter
    }

    /// Charger presence changed.
    pub fn on_charger_change(&mut self, connected: bool) {
        info!(
            "Charger {}",
            if connected { "connected" } else { "disconnected" }
        );
        self.filter.set_charging(connected);
    }

    /// Filter a sample, convert it and publish the level.
    ///
    /// Returns the new level, or `None` when the gauge failed. A rejected
    /// sample leaves both the published level and the filter untouched, so
    /// one bad reading cannot pin later ones.
    pub fn on_sample<G, N>(
        &mut self,
        raw_millivolt: u16,
        gauge: &G,
        table: &mut AttributeTable,
        notifier: &mut N,
    ) -> Option<u8>
    where
        G: BatteryGauge,
        N: Notifier,
    {
        let millivolt = self.filter.filtered(raw_millivolt);

        let percentage = match gauge.percentage(millivolt) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to calculate battery percentage ({:?})", e);
                return None;
            }
        };
        self.filter.accept(raw_millivolt);

        info!("Battery is at {} mV (capacity {}%)", millivolt, percentage);

        table.set_battery_level(percentage);
        table.notify_subscribers(AttributeHandle::BatteryLevel, notifier);
        Some(percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::PeerId;
    use crate::error::{HardwareError, TransportError};

    fn run(filter: &mut ChargeFilter, samples: &[u16]) -> heapless::Vec<u16, 8> {
        samples.iter().map(|&mv| filter.accept(mv)).collect()
    }

    #[test]
    fn charging_never_reports_a_drop() {
        let mut filter = ChargeFilter::new(true);
        assert_eq!(run(&mut filter, &[3700, 3650, 3720]).as_slice(), &[3700, 3700, 3720]);
    }

    #[test]
    fn discharging_never_reports_a_rise() {
        let mut filter = ChargeFilter::new(false);
        assert_eq!(run(&mut filter, &[3700, 3750, 3680]).as_slice(), &[3700, 3700, 3680]);
    }

    #[test]
    fn first_sample_passes_through() {
        let mut filter = ChargeFilter::new(true);
        assert_eq!(filter.last_millivolt(), None);
        assert_eq!(filter.accept(3100), 3100);
        assert_eq!(filter.last_millivolt(), Some(3100));
    }

    #[test]
    fn charger_change_applies_to_next_sample() {
        let mut filter = ChargeFilter::new(false);
        filter.accept(3800);
        filter.set_charging(true);
        assert_eq!(filter.accept(3750), 3800);
        filter.set_charging(false);
        assert_eq!(filter.accept(3750), 3750);
    }

    struct HalfGauge;

    impl BatteryGauge for HalfGauge {
        fn percentage(&self, millivolt: u16) -> Result<u8, HardwareError> {
            Ok((millivolt / 100) as u8)
        }
    }

    struct BrokenGauge;

    impl BatteryGauge for BrokenGauge {
        fn percentage(&self, _millivolt: u16) -> Result<u8, HardwareError> {
            Err(HardwareError::Calibration)
        }
    }

    #[derive(Default)]
    struct Sink {
        sent: heapless::Vec<(PeerId, u8), 8>,
    }

    impl Notifier for Sink {
        fn notify(
            &mut self,
            peer: PeerId,
            handle: AttributeHandle,
            value: &[u8],
        ) -> Result<(), TransportError> {
            assert_eq!(handle, AttributeHandle::BatteryLevel);
            self.sent.push((peer, value[0])).unwrap();
            Ok(())
        }
    }

    #[test]
    fn sample_publishes_level_and_notifies() {
        let mut monitor = BatteryMonitor::new(false);
        let mut table = AttributeTable::new();
        table
            .set_subscription(AttributeHandle::BatteryLevel, 7, true)
            .unwrap();
        let mut sink = Sink::default();

        assert_eq!(monitor.on_sample(4000, &HalfGauge, &mut table, &mut sink), Some(40));
        assert_eq!(table.battery_level(), 40);
        assert_eq!(sink.sent.as_slice(), &[(7, 40)]);
    }

    #[test]
    fn gauge_failure_keeps_previous_level() {
        let mut monitor = BatteryMonitor::new(false);
        let mut table = AttributeTable::new();
        table.set_battery_level(55);
        let mut sink = Sink::default();

        assert_eq!(monitor.on_sample(3900, &BrokenGauge, &mut table, &mut sink), None);
        assert_eq!(table.battery_level(), 55);
        assert!(sink.sent.is_empty());
        assert_eq!(monitor.filter().last_millivolt(), None);
    }

    #[test]
    fn dead_reading_does_not_pin_the_filter() {
        use crate::battery::curve::{divider_millivolt, LipoGauge};

        let mut monitor = BatteryMonitor::new(false);
        let mut table = AttributeTable::new();
        let mut sink = Sink::default();

        let first = monitor.on_sample(3900, &LipoGauge, &mut table, &mut sink);
        assert!(first.is_some());
        assert_eq!(
            monitor.on_sample(divider_millivolt(-3), &LipoGauge, &mut table, &mut sink),
            None
        );
        assert_eq!(monitor.filter().last_millivolt(), Some(3900));
        assert_eq!(table.battery_level(), first.unwrap());

        // Discharging: a rise is clamped, a drop goes through.
        assert_eq!(monitor.on_sample(3950, &LipoGauge, &mut table, &mut sink), first);
        let lower = monitor.on_sample(3850, &LipoGauge, &mut table, &mut sink).unwrap();
        assert!(lower < first.unwrap());
        assert_eq!(monitor.filter().last_millivolt(), Some(3850));
    }

    #[test]
    fn filtered_does_not_advance_state() {
        let mut filter = ChargeFilter::new(false);
        filter.accept(3800);
        assert_eq!(filter.filtered(0), 0);
        assert_eq!(filter.last_millivolt(), Some(3800));
    }

    #[test]
    fn charger_callback_drives_the_filter() {
        let mut monitor = BatteryMonitor::new(false);
        let mut table = AttributeTable::new();
        let mut sink = Sink::default();

        monitor.on_sample(3700, &HalfGauge, &mut table, &mut sink);
        monitor.on_charger_change(true);
        assert!(monitor.filter().is_charging());
        assert_eq!(monitor.on_sample(3650, &HalfGauge, &mut table, &mut sink), Some(37));
    }
}
