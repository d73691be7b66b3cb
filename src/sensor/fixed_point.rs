//! Q31 fixed-point to GATT scaled integer conversion.
//!
//! Sensor decoders yield `value / 2^(31 - shift)`; the Environmental
//! Sensing characteristics carry `sint16` with exponent -2, so the
//! stored integer is the physical value × 100 (23.45 °C -> 2345).

use core::fmt;

use crate::hal::FixedPointSample;

/// Beyond this many bits of right shift any Q31 × 100 product is zero.
const MAX_USEFUL_SHIFT: i32 = 40;

/// Convert to the ×100 integer convention.
///
/// Truncates toward zero; results outside the `i16` range saturate.
pub fn to_centi(sample: FixedPointSample) -> i16 {
    let scaled = i64::from(sample.value) * 100;
    let exponent = 31 - i32::from(sample.shift);

    let centi = if exponent >= MAX_USEFUL_SHIFT {
        0
    } else if exponent >= 0 {
        scaled / (1i64 << exponent)
    } else if -exponent >= MAX_USEFUL_SHIFT {
        if scaled == 0 {
            0
        } else if scaled > 0 {
            i64::MAX
        } else {
            i64::MIN
        }
    } else {
        scaled.saturating_mul(1i64 << -exponent)
    };

    centi.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}

/// A ×100 integer rendered as a two-decimal value in log output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Centi(pub i16);

impl Centi {
    fn parts(self) -> (&'static str, u16, u16) {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        (sign, abs / 100, abs % 100)
    }
}

impl fmt::Display for Centi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sign, whole, frac) = self.parts();
        write!(f, "{}{}.{:02}", sign, whole, frac)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Centi {
    fn format(&self, f: defmt::Formatter) {
        let (sign, whole, frac) = self.parts();
        if frac < 10 {
            defmt::write!(f, "{}{}.0{}", sign, whole, frac)
        } else {
            defmt::write!(f, "{}{}.{}", sign, whole, frac)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(value: i32, shift: i8) -> FixedPointSample {
        FixedPointSample { value, shift }
    }

    #[test]
    fn temperature_23_45() {
        assert_eq!(to_centi(q(1_573_702_861, 5)), 2345);
    }

    #[test]
    fn negative_values_truncate_toward_zero() {
        // -10.5 °C exactly.
        assert_eq!(to_centi(q(-704_643_072, 5)), -1050);
        // Slightly below -10.5: truncation keeps -1050, not -1051.
        assert_eq!(to_centi(q(-704_643_080, 5)), -1050);
    }

    #[test]
    fn bme280_ranges_fit() {
        // Pressure in kPa, humidity in %RH, both with shift 7.
        assert_eq!(to_centi(q(1_699_867_526, 7)), 10132);
        assert_eq!(to_centi(q(756_987_986, 7)), 4512);
        // 85 °C (sensor maximum) and -40 °C (minimum) with shift 7.
        assert_eq!(to_centi(q(1_426_063_360, 7)), 8500);
        assert_eq!(to_centi(q(-671_088_640, 7)), -4000);
    }

    #[test]
    fn saturates_outside_i16() {
        assert_eq!(to_centi(q(i32::MAX, 16)), i16::MAX);
        assert_eq!(to_centi(q(i32::MIN, 16)), i16::MIN);
        assert_eq!(to_centi(q(1, 100)), i16::MAX);
        assert_eq!(to_centi(q(-1, 100)), i16::MIN);
    }

    #[test]
    fn tiny_values_are_zero() {
        assert_eq!(to_centi(q(i32::MAX, -20)), 0);
        assert_eq!(to_centi(q(0, 0)), 0);
        assert_eq!(to_centi(q(0, 127)), 0);
    }

    #[test]
    fn centi_display() {
        assert_eq!(Centi(2345).to_string(), "23.45");
        assert_eq!(Centi(-1005).to_string(), "-10.05");
        assert_eq!(Centi(7).to_string(), "0.07");
    }
}
