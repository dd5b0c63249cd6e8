//! Measurement values for the long and double counter variants.

use std::fmt;

use serde::Serialize;

use crate::instrument::NumberKind;

/// A recorded value, tagged with its number kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Number {
    /// Value of a long counter.
    Long(i64),
    /// Value of a double counter.
    Double(f64),
}

impl Number {
    /// The kind this value was recorded as.
    pub fn kind(&self) -> NumberKind {
        match self {
            Number::Long(_) => NumberKind::Long,
            Number::Double(_) => NumberKind::Double,
        }
    }

    /// Lossy conversion for display and summing across kinds.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Long(v) => v as f64,
            Number::Double(v) => v,
        }
    }

    /// Add `other` to `self`, saturating for longs.
    ///
    /// Mixing kinds is not expected; the result then takes `self`'s kind.
    #[must_use]
    pub fn saturating_add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Long(a), Number::Long(b)) => Number::Long(a.saturating_add(b)),
            (Number::Long(a), Number::Double(b)) => Number::Long(a.saturating_add(b as i64)),
            (Number::Double(a), b) => Number::Double(a + b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Long(v) => write!(f, "{v}"),
            Number::Double(v) => write!(f, "{v}"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i64 {}
    impl Sealed for f64 {}
}

/// Value types a counter can be built over: `i64` and `f64`.
///
/// Sealed; the two implementations are the long and double variants.
pub trait CounterValue: sealed::Sealed + Copy + Send + Sync + fmt::Debug + 'static {
    /// Kind recorded in the instrument descriptor.
    const KIND: NumberKind;

    /// Whether `self` is a legal increment of a monotonic sum.
    fn is_valid_increment(self) -> bool;

    /// Tag the value.
    fn into_number(self) -> Number;
}

impl CounterValue for i64 {
    const KIND: NumberKind = NumberKind::Long;

    #[inline]
    fn is_valid_increment(self) -> bool {
        self >= 0
    }

    #[inline]
    fn into_number(self) -> Number {
        Number::Long(self)
    }
}

impl CounterValue for f64 {
    const KIND: NumberKind = NumberKind::Double;

    /// Rejects negatives and NaN. `+inf` is accepted.
    #[inline]
    fn is_valid_increment(self) -> bool {
        self >= 0.0
    }

    #[inline]
    fn into_number(self) -> Number {
        Number::Double(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, true)]
    #[case(1, true)]
    #[case(i64::MAX, true)]
    #[case(-1, false)]
    #[case(i64::MIN, false)]
    fn long_increments(#[case] value: i64, #[case] valid: bool) {
        assert_eq!(value.is_valid_increment(), valid);
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(-0.0, true)]
    #[case(2.5, true)]
    #[case(f64::INFINITY, true)]
    #[case(-0.1, false)]
    #[case(f64::NEG_INFINITY, false)]
    #[case(f64::NAN, false)]
    fn double_increments(#[case] value: f64, #[case] valid: bool) {
        assert_eq!(value.is_valid_increment(), valid);
    }

    #[test]
    fn long_sum_saturates() {
        assert_eq!(
            Number::Long(i64::MAX).saturating_add(Number::Long(1)),
            Number::Long(i64::MAX)
        );
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(5_i64.into_number().kind(), NumberKind::Long);
        assert_eq!(5.0_f64.into_number().kind(), NumberKind::Double);
    }
}
