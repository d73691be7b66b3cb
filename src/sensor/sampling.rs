//! Periodic environmental sample-and-notify pipeline.
//!
//! One cycle: burst read -> decoder refresh -> per-channel decode ->
//! cache update -> notify all subscribers. Every exit path of
//! [`SamplingPipeline::run_cycle`] yields the delay to the next cycle, so a
//! failing sensor never stalls the schedule; the caller waits for that
//! delay only after the cycle has returned, which keeps cycles from
//! overlapping.
//!
//! The cycle is also available as two phases. [`SamplingPipeline::sample`]
//! touches only the sensor, [`SamplingPipeline::publish`] only the table,
//! so firmware can keep bus transfers outside the table lock.

use crate::attributes::{AttributeHandle, AttributeTable, Notifier};
use crate::config::SAMPLING_INTERVAL_MS;
use crate::error::{Error, HardwareError};
use crate::hal::{Channel, EnvironmentSensor, RawBuffer, RAW_BUFFER_LEN};
use crate::sensor::fixed_point::{to_centi, Centi};

/// Decoded values of one cycle; `None` marks a channel that failed to decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleRecord {
    pub temperature: Option<i16>,
    pub pressure: Option<i16>,
    pub humidity: Option<i16>,
}

impl SampleRecord {
    pub fn get(&self, handle: AttributeHandle) -> Option<i16> {
        match handle {
            AttributeHandle::Temperature => self.temperature,
            AttributeHandle::Pressure => self.pressure,
            AttributeHandle::Humidity => self.humidity,
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.temperature.is_some() && self.pressure.is_some() && self.humidity.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    /// Values cached and pushed to `notifications` subscribers.
    Published {
        record: SampleRecord,
        notifications: usize,
    },
    /// Burst read failed; cache untouched.
    ReadFailed(HardwareError),
    /// Decoder unavailable; cache untouched.
    DecoderUnavailable(HardwareError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Delay before the next cycle (ms).
    pub next_in_ms: u64,
}

/// Environmental sampling schedule.
pub struct SamplingPipeline {
    interval_ms: u64,
    cycles: u32,
}

/// Check the sensor and create the pipeline.
///
/// Fails with [`Error::DeviceNotReady`] when the sensor is missing; the
/// other services start regardless.
pub fn environmental_service_start<S: EnvironmentSensor>(
    sensor: &S,
) -> Result<SamplingPipeline, Error> {
    if !sensor.is_ready() {
        error!("Environmental sensor is not ready");
        return Err(Error::DeviceNotReady);
    }
    info!("Environmental sampling every {} ms", SAMPLING_INTERVAL_MS);
    Ok(SamplingPipeline::new(SAMPLING_INTERVAL_MS))
}

impl SamplingPipeline {
    pub const fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            cycles: 0,
        }
    }

    /// Delay before the first cycle (ms).
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Run one sampling cycle to completion.
    pub fn run_cycle<S, N>(
        &mut self,
        sensor: &mut S,
        table: &mut AttributeTable,
        notifier: &mut N,
    ) -> CycleReport
    where
        S: EnvironmentSensor,
        N: Notifier,
    {
        match self.sample(sensor) {
            Ok(record) => self.publish(record, table, notifier),
            Err(report) => report,
        }
    }

    /// Sensor half of a cycle: read, refresh the decoder and decode.
    ///
    /// A failure ends the cycle and comes back as its final report.
    pub fn sample<S: EnvironmentSensor>(&mut self, sensor: &mut S) -> Result<SampleRecord, CycleReport> {
        self.cycles = self.cycles.wrapping_add(1);
        let mut buf: RawBuffer = [0; RAW_BUFFER_LEN];

        if let Err(e) = sensor.read_burst(&mut buf) {
            error!("Failed to read the sensor data ({:?})", e);
            return Err(self.report(CycleOutcome::ReadFailed(e)));
        }

        if let Err(e) = sensor.refresh_decoder() {
            error!("Failed to get the sensor decoder ({:?})", e);
            return Err(self.report(CycleOutcome::DecoderUnavailable(e)));
        }

        let decode = |channel: Channel| match sensor.decode(&buf, channel) {
            Ok(sample) => Some(to_centi(sample)),
            Err(e) => {
                warn!("Failed to decode {:?} ({:?})", channel, e);
                None
            }
        };

        Ok(SampleRecord {
            temperature: decode(Channel::AmbientTemperature),
            pressure: decode(Channel::Pressure),
            humidity: decode(Channel::Humidity),
        })
    }

    /// Table half of a cycle: cache the record and notify subscribers.
    pub fn publish<N: Notifier>(
        &self,
        record: SampleRecord,
        table: &mut AttributeTable,
        notifier: &mut N,
    ) -> CycleReport {
        // A channel that failed to decode keeps its previous value.
        for handle in AttributeHandle::ENVIRONMENTAL {
            if let Some(value) = record.get(handle) {
                table.set_environmental(handle, value);
            }
        }

        let mut notifications = 0;
        for handle in AttributeHandle::ENVIRONMENTAL {
            notifications += table.notify_subscribers(handle, notifier);
        }

        let cached = |handle| Centi(table.environmental(handle).unwrap_or_default());
        info!(
            "Temp: {} DegC; Press: {} kPa; Humidity: {} %RH",
            cached(AttributeHandle::Temperature),
            cached(AttributeHandle::Pressure),
            cached(AttributeHandle::Humidity)
        );

        self.report(CycleOutcome::Published {
            record,
            notifications,
        })
    }

    fn report(&self, outcome: CycleOutcome) -> CycleReport {
        CycleReport {
            outcome,
            next_in_ms: self.interval_ms,
        }
    }
}
