//! BME280 register layout and integer compensation.
//!
//! Bus access lives in the firmware; this module turns calibration and
//! measurement bytes into [`FixedPointSample`]s. Formulas are the 32/64-bit
//! integer ones from the Bosch datasheet (section 4.2.3).

use crate::error::HardwareError;
use crate::hal::{Channel, FixedPointSample, RawBuffer};

pub const REG_CALIB_00: u8 = 0x88;
pub const REG_CHIP_ID: u8 = 0xD0;
pub const REG_RESET: u8 = 0xE0;
pub const REG_CALIB_26: u8 = 0xE1;
pub const REG_CTRL_HUM: u8 = 0xF2;
pub const REG_CTRL_MEAS: u8 = 0xF4;
pub const REG_CONFIG: u8 = 0xF5;
pub const REG_PRESS_MSB: u8 = 0xF7;

pub const CHIP_ID: u8 = 0x60;
pub const RESET_COMMAND: u8 = 0xB6;

/// Humidity oversampling ×1.
pub const CTRL_HUM_OSRS_1: u8 = 0x01;
/// Temperature and pressure oversampling ×1, normal mode.
pub const CTRL_MEAS_NORMAL: u8 = 0x27;
/// 1000 ms standby, filter off.
pub const CONFIG_STANDBY_1000MS: u8 = 0xA0;

pub const CALIB_00_LEN: usize = 26;
pub const CALIB_26_LEN: usize = 7;
/// press[3] + temp[3] + hum[2].
pub const MEASUREMENT_LEN: usize = 8;

/// ADC value reported for a skipped pressure/temperature measurement.
const SKIPPED_20BIT: i32 = 0x80000;
/// ADC value reported for a skipped humidity measurement.
const SKIPPED_16BIT: i32 = 0x8000;

/// Every channel is reported with this shift (range ±128).
const SHIFT: i8 = 7;

/// Factory trimming parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p: [i64; 9],
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_i16(b: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([b[at], b[at + 1]])
}

impl Calibration {
    /// Parse the two calibration blocks (`0x88..=0xA1`, `0xE1..=0xE7`).
    pub fn parse(calib00: &[u8; CALIB_00_LEN], calib26: &[u8; CALIB_26_LEN]) -> Self {
        let mut p = [0i64; 9];
        p[0] = i64::from(le_u16(calib00, 6));
        for (i, slot) in p.iter_mut().enumerate().skip(1) {
            *slot = i64::from(le_i16(calib00, 6 + 2 * i));
        }

        Self {
            t1: le_u16(calib00, 0),
            t2: le_i16(calib00, 2),
            t3: le_i16(calib00, 4),
            p,
            h1: calib00[25],
            h2: le_i16(calib26, 0),
            h3: calib26[2],
            h4: (i16::from(calib26[3] as i8) << 4) | i16::from(calib26[4] & 0x0F),
            h5: (i16::from(calib26[5] as i8) << 4) | i16::from(calib26[4] >> 4),
            h6: calib26[6] as i8,
        }
    }

    /// Fine temperature shared by all three compensations.
    fn t_fine(&self, adc_t: i32) -> i64 {
        let adc_t = i64::from(adc_t);
        let t1 = i64::from(self.t1);
        let var1 = (((adc_t >> 3) - (t1 << 1)) * i64::from(self.t2)) >> 11;
        let d = (adc_t >> 4) - t1;
        let var2 = (((d * d) >> 12) * i64::from(self.t3)) >> 14;
        var1 + var2
    }

    /// Temperature in 0.01 °C.
    fn temperature(&self, t_fine: i64) -> i64 {
        (t_fine * 5 + 128) >> 8
    }

    /// Pressure in Pa as Q24.8.
    fn pressure(&self, adc_p: i32, t_fine: i64) -> Option<i64> {
        let [p1, p2, p3, p4, p5, p6, p7, p8, p9] = self.p;

        let mut var1 = t_fine - 128_000;
        let mut var2 = var1 * var1 * p6;
        var2 += (var1 * p5) << 17;
        var2 += p4 << 35;
        var1 = ((var1 * var1 * p3) >> 8) + ((var1 * p2) << 12);
        var1 = (((1i64 << 47) + var1) * p1) >> 33;
        if var1 == 0 {
            return None;
        }

        let mut p = 1_048_576 - i64::from(adc_p);
        p = (((p << 31) - var2) * 3125) / var1;
        var1 = (p9 * (p >> 13) * (p >> 13)) >> 25;
        var2 = (p8 * p) >> 19;
        Some(((p + var1 + var2) >> 8) + (p7 << 4))
    }

    /// Relative humidity in %RH as Q22.10.
    fn humidity(&self, adc_h: i32, t_fine: i64) -> i64 {
        let x = t_fine - 76_800;
        let h1 = i64::from(self.h1);
        let h2 = i64::from(self.h2);
        let h3 = i64::from(self.h3);
        let h4 = i64::from(self.h4);
        let h5 = i64::from(self.h5);
        let h6 = i64::from(self.h6);

        let a = ((i64::from(adc_h) << 14) - (h4 << 20) - (h5 * x) + 16_384) >> 15;
        let b = (((((x * h6) >> 10) * (((x * h3) >> 11) + 32_768)) >> 10) + 2_097_152) * h2 + 8_192;
        let mut v = a * (b >> 14);
        v -= ((((v >> 15) * (v >> 15)) >> 7) * h1) >> 4;
        v.clamp(0, 419_430_400) >> 12
    }
}

/// Uncompensated ADC values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Measurement {
    pub adc_p: i32,
    pub adc_t: i32,
    pub adc_h: i32,
}

impl Measurement {
    /// Unpack a burst read starting at `0xF7`.
    pub fn parse(buf: &RawBuffer) -> Self {
        let adc20 = |i: usize| {
            (i32::from(buf[i]) << 12) | (i32::from(buf[i + 1]) << 4) | (i32::from(buf[i + 2]) >> 4)
        };
        Self {
            adc_p: adc20(0),
            adc_t: adc20(3),
            adc_h: (i32::from(buf[6]) << 8) | i32::from(buf[7]),
        }
    }
}

/// Divide rounding away from zero, so converting back with truncation
/// lands on the original value.
fn div_away(n: i64, d: i64) -> i64 {
    if n >= 0 {
        (n + d - 1) / d
    } else {
        (n - d + 1) / d
    }
}

fn q31(value: i64) -> Result<FixedPointSample, HardwareError> {
    let value = i32::try_from(value).map_err(|_| HardwareError::Decode)?;
    Ok(FixedPointSample {
        value,
        shift: SHIFT,
    })
}

/// Compensate one channel of a burst.
///
/// Temperature comes out in °C, pressure in kPa, humidity in %RH.
pub fn decode(
    cal: &Calibration,
    buf: &RawBuffer,
    channel: Channel,
) -> Result<FixedPointSample, HardwareError> {
    let m = Measurement::parse(buf);
    if m.adc_t == SKIPPED_20BIT {
        return Err(HardwareError::Decode);
    }
    let t_fine = cal.t_fine(m.adc_t);

    match channel {
        Channel::AmbientTemperature => {
            let centi = cal.temperature(t_fine);
            q31(div_away(centi << 24, 100))
        }
        Channel::Pressure => {
            if m.adc_p == SKIPPED_20BIT {
                return Err(HardwareError::Decode);
            }
            let pa_q8 = cal.pressure(m.adc_p, t_fine).ok_or(HardwareError::Decode)?;
            // Pa/256 -> kPa in Q(31 - SHIFT)
            q31((pa_q8 << 16) / 1000)
        }
        Channel::Humidity => {
            if m.adc_h == SKIPPED_16BIT {
                return Err(HardwareError::Decode);
            }
            q31(cal.humidity(m.adc_h, t_fine) << 14)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::RAW_BUFFER_LEN;
    use crate::sensor::fixed_point::to_centi;

    fn calibration_bytes() -> ([u8; CALIB_00_LEN], [u8; CALIB_26_LEN]) {
        let mut c0 = [0u8; CALIB_00_LEN];
        let words: [i32; 12] = [
            27504, 26435, -1000, 36477, -10685, 3024, 2855, 140, -7, 15500, -14600, 6000,
        ];
        for (i, w) in words.iter().enumerate() {
            c0[2 * i..2 * i + 2].copy_from_slice(&(*w as u16).to_le_bytes());
        }
        c0[25] = 75;
        // H2 = 362, H3 = 0, H4 = 324, H5 = 50, H6 = 30
        let c26 = [0x6A, 0x01, 0x00, 0x14, 0x24, 0x03, 30];
        (c0, c26)
    }

    fn burst() -> RawBuffer {
        let mut buf = [0u8; RAW_BUFFER_LEN];
        // adc_P = 415148, adc_T = 519888, adc_H = 30000
        buf[..MEASUREMENT_LEN].copy_from_slice(&[0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00, 0x75, 0x30]);
        buf
    }

    fn centi(channel: Channel) -> Result<i16, HardwareError> {
        let (c0, c26) = calibration_bytes();
        let cal = Calibration::parse(&c0, &c26);
        decode(&cal, &burst(), channel).map(to_centi)
    }

    #[test]
    fn parses_calibration() {
        let (c0, c26) = calibration_bytes();
        let cal = Calibration::parse(&c0, &c26);
        assert_eq!(cal.t1, 27504);
        assert_eq!(cal.t3, -1000);
        assert_eq!(cal.p[0], 36477);
        assert_eq!(cal.p[1], -10685);
        assert_eq!(cal.p[8], 6000);
        assert_eq!(cal.h1, 75);
        assert_eq!(cal.h2, 362);
        assert_eq!(cal.h4, 324);
        assert_eq!(cal.h5, 50);
        assert_eq!(cal.h6, 30);
    }

    #[test]
    fn parses_measurement() {
        let m = Measurement::parse(&burst());
        assert_eq!(m.adc_p, 415_148);
        assert_eq!(m.adc_t, 519_888);
        assert_eq!(m.adc_h, 30_000);
    }

    #[test]
    fn datasheet_temperature() {
        // 25.08 °C
        assert_eq!(centi(Channel::AmbientTemperature), Ok(2508));
    }

    #[test]
    fn datasheet_pressure() {
        // 100653.25 Pa
        assert_eq!(centi(Channel::Pressure), Ok(10065));
    }

    #[test]
    fn humidity() {
        // 51.08 %RH
        assert_eq!(centi(Channel::Humidity), Ok(5108));
    }

    #[test]
    fn skipped_humidity_fails_only_humidity() {
        let (c0, c26) = calibration_bytes();
        let cal = Calibration::parse(&c0, &c26);
        let mut buf = burst();
        buf[6] = 0x80;
        buf[7] = 0x00;
        assert_eq!(decode(&cal, &buf, Channel::Humidity), Err(HardwareError::Decode));
        assert!(decode(&cal, &buf, Channel::Pressure).is_ok());
    }

    #[test]
    fn uncalibrated_pressure_fails() {
        let cal = Calibration::default();
        assert_eq!(decode(&cal, &burst(), Channel::Pressure), Err(HardwareError::Decode));
    }
}
