//! Single-cell LiPo open-circuit voltage to capacity curve.

use crate::config::{BATTERY_DIVIDER_DEN, BATTERY_DIVIDER_NUM};
use crate::error::HardwareError;
use crate::hal::BatteryGauge;

/// SAADC full scale with gain 1/6 and the 0.6 V internal reference (mV).
const ADC_FULL_SCALE_MV: u32 = 3600;
/// 12-bit conversion.
const ADC_COUNTS: u32 = 4096;

/// (millivolt, percent) points, descending voltage.
pub const LIPO_CURVE: [(u16, u8); 12] = [
    (4200, 100),
    (4160, 99),
    (4090, 91),
    (4030, 78),
    (3890, 63),
    (3830, 53),
    (3680, 36),
    (3660, 35),
    (3520, 14),
    (3490, 11),
    (3410, 1),
    (3270, 0),
];

/// Linear interpolation over [`LIPO_CURVE`], clamped to 0..=100.
pub fn lipo_percentage(millivolt: u16) -> u8 {
    let (top_mv, top_pct) = LIPO_CURVE[0];
    if millivolt >= top_mv {
        return top_pct;
    }

    for pair in LIPO_CURVE.windows(2) {
        let (hi_mv, hi_pct) = pair[0];
        let (lo_mv, lo_pct) = pair[1];
        if millivolt >= lo_mv {
            let span_mv = u32::from(hi_mv - lo_mv);
            let span_pct = u32::from(hi_pct - lo_pct);
            let above = u32::from(millivolt - lo_mv);
            return lo_pct + (above * span_pct / span_mv) as u8;
        }
    }

    0
}

/// Battery voltage from a raw SAADC count taken behind the divider.
///
/// Negative counts (single-ended noise around ground) read as 0 mV.
pub fn divider_millivolt(raw: i16) -> u16 {
    let counts = u64::from(raw.max(0).unsigned_abs());
    let vbat = counts * u64::from(ADC_FULL_SCALE_MV * BATTERY_DIVIDER_NUM)
        / u64::from(ADC_COUNTS * BATTERY_DIVIDER_DEN);
    vbat.min(u64::from(u16::MAX)) as u16
}

/// Like [`divider_millivolt`], but a count at or below ground is a failed
/// reading instead of 0 mV.
pub fn read_divider(raw: i16) -> Result<u16, HardwareError> {
    match divider_millivolt(raw) {
        0 => Err(HardwareError::BatteryRead),
        mv => Ok(mv),
    }
}

/// Gauge backed by [`LIPO_CURVE`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LipoGauge;

impl BatteryGauge for LipoGauge {
    fn percentage(&self, millivolt: u16) -> Result<u8, HardwareError> {
        // A zero reading means the divider is not connected.
        if millivolt == 0 {
            return Err(HardwareError::Calibration);
        }
        Ok(lipo_percentage(millivolt))
    }
}
