use chrono::{DateTime, Utc};
use std::fmt;

/// A decimal quantity with exactly one fractional digit, stored in tenths.
///
/// The fixed-point sensor encoding transmits tenths natively and the
/// integer-only encoding transmits whole units, so tenths keep every wire
/// conversion exact. Ordering and equality are those of the underlying
/// integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tenths(i16);

impl Tenths {
    pub const fn new(tenths: i16) -> Tenths {
        Tenths(tenths)
    }

    /// Converts a value in thousandths, rounding half-up (ties away from
    /// zero). Inputs beyond ±3276.7 units saturate.
    pub fn from_milli(milli: i32) -> Tenths {
        let milli = i64::from(milli);
        let tenths = (milli.abs() + 50) / 100 * milli.signum();
        Tenths(tenths.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16)
    }

    pub const fn tenths(self) -> i16 {
        self.0
    }
}

impl fmt::Display for Tenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            f.write_str("-")?;
        }
        let magnitude = self.0.unsigned_abs();
        write!(f, "{}.{}", magnitude / 10, magnitude % 10)
    }
}

impl From<Tenths> for f32 {
    fn from(value: Tenths) -> f32 {
        f32::from(value.0) * 0.1
    }
}

impl From<Tenths> for f64 {
    fn from(value: Tenths) -> f64 {
        f64::from(value.0) * 0.1
    }
}

/// One validated sensor reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Measurement {
    /// Capture time (UTC), stamped when the read began.
    pub at: DateTime<Utc>,
    pub temperature: Tenths,
    /// Relative humidity; `None` for families that measure only temperature.
    pub humidity: Option<Tenths>,
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! test_display {
        ($name:ident, $tenths:expr, $expected:expr) => {
            #[test]
            fn $name() {
                assert_eq!(Tenths::new($tenths).to_string(), $expected);
            }
        };
    }

    test_display!(display_positive, 214, "21.4");
    test_display!(display_negative, -25, "-2.5");
    test_display!(display_negative_below_one, -5, "-0.5");
    test_display!(display_zero, 0, "0.0");
    test_display!(display_whole, 220, "22.0");

    macro_rules! test_from_milli {
        ($name:ident, $milli:expr, $tenths:expr) => {
            #[test]
            fn $name() {
                assert_eq!(Tenths::from_milli($milli), Tenths::new($tenths));
            }
        };
    }

    test_from_milli!(from_milli_rounds_down, 21_437, 214);
    test_from_milli!(from_milli_rounds_half_up, 21_450, 215);
    test_from_milli!(from_milli_negative_ties_away_from_zero, -21_450, -215);
    test_from_milli!(from_milli_small_value, 50, 1);
    test_from_milli!(from_milli_zero, 0, 0);

    #[test]
    fn tenths_to_f32() {
        let value: f32 = Tenths::new(-25).into();
        assert!((value + 2.5).abs() < 1e-6);
    }

    #[test]
    fn ordering_is_numeric() {
        assert!(Tenths::new(-25) < Tenths::new(0));
        assert!(Tenths::new(198) < Tenths::new(201));
    }
}
