//! Sompi conversion module.
//!
//! All Kaspa amounts inside the core are stored as [`Sompi`], a newtype
//! over `u128`. The wider backing integer (vs. a plain `u64`) gives
//! headroom for intermediate sums (`selectedAmount`, fee accumulation)
//! that `spec.md` treats as logically unbounded integers; conversion to
//! and from KAS (the client-facing floating unit) happens only at the
//! edges of the builder service, per `spec.md` §4.C "Numeric semantics".
//!
//! Construction is always through checked arithmetic; there is no path
//! that silently wraps or truncates.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use thiserror::Error;

const SOMPI_PER_KAS: u128 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sompi(u128);

#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("amount overflowed sompi representation")]
    Overflow,
    #[error("KAS amount must be positive, got {0}")]
    NonPositive(Decimal),
    #[error("KAS amount has no valid sompi representation: {0}")]
    Unrepresentable(Decimal),
}

impl Sompi {
    pub const ZERO: Sompi = Sompi(0);

    pub fn new(raw: u128) -> Self {
        Sompi(raw)
    }

    pub fn to_raw(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Sompi)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Sompi)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Sompi(self.0.saturating_sub(other.0))
    }

    /// Multiply by a basis-points value (e.g. fee-bps calculations), rounding down.
    pub fn mul_bps_floor(self, bps: u32) -> Sompi {
        Sompi((self.0 * bps as u128) / 10_000)
    }

    pub fn clamp(self, min: Sompi, max: Sompi) -> Sompi {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }

    /// Convert a client-supplied KAS amount into sompi, rounded up.
    ///
    /// `spec.md` §4.C: "conversions ... are performed only at the edges
    /// ... rounded down for available balance, up for targets." Output
    /// amounts are targets, so this side always rounds up.
    pub fn from_kas_ceil(kas: Decimal) -> Result<Self, MoneyError> {
        if kas <= Decimal::ZERO {
            return Err(MoneyError::NonPositive(kas));
        }
        let scaled = kas * Decimal::from(SOMPI_PER_KAS);
        let ceiled = scaled.ceil();
        ceiled
            .to_u128()
            .map(Sompi)
            .ok_or(MoneyError::Unrepresentable(kas))
    }

    /// Convert a balance-side sompi amount back into a KAS decimal,
    /// rounded down (`spec.md` §4.C: "rounded down for available balance").
    pub fn to_kas_floor(self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(SOMPI_PER_KAS)
    }
}

impl fmt::Display for Sompi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Sompi {
    type Output = Sompi;
    fn add(self, rhs: Self) -> Self::Output {
        Sompi(self.0 + rhs.0)
    }
}

impl AddAssign for Sompi {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Sompi {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Sompi::ZERO, Add::add)
    }
}

/// Stringify a `u128` as a decimal string when it exceeds the safe
/// integer range for JSON numbers, per `spec.md` §4.D step 6. Values
/// within `Number.MAX_SAFE_INTEGER` (2^53 - 1) are still emitted as a
/// JSON number for compactness; anything larger is a quoted string.
pub fn json_amount(value: u128) -> serde_json::Value {
    const MAX_SAFE_INTEGER: u128 = 9_007_199_254_740_991;
    if value <= MAX_SAFE_INTEGER {
        serde_json::Value::Number(serde_json::Number::from(value as u64))
    } else {
        serde_json::Value::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_kas_ceil_rounds_up() {
        let s = Sompi::from_kas_ceil(Decimal::new(1, 8)).unwrap(); // 0.00000001 KAS = 1 sompi
        assert_eq!(s.to_raw(), 1);

        // A value requiring rounding: 0.000000015 KAS -> 1.5 sompi -> ceil to 2.
        let s2 = Sompi::from_kas_ceil(Decimal::new(15, 9)).unwrap();
        assert_eq!(s2.to_raw(), 2);
    }

    #[test]
    fn from_kas_ceil_rejects_non_positive() {
        assert!(Sompi::from_kas_ceil(Decimal::ZERO).is_err());
        assert!(Sompi::from_kas_ceil(Decimal::new(-1, 8)).is_err());
    }

    #[test]
    fn to_kas_floor_round_trips_whole_kas() {
        let s = Sompi::new(SOMPI_PER_KAS * 3);
        assert_eq!(s.to_kas_floor(), Decimal::new(3, 0));
    }

    #[test]
    fn json_amount_switches_to_string_past_safe_integer() {
        assert!(json_amount(42).is_number());
        assert!(json_amount(u128::MAX).is_string());
    }
}
