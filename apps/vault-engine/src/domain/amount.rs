//! Amount and value objects for vault accounting.
//!
//! All quantities use [`rust_decimal::Decimal`] for precise financial
//! arithmetic. [`Amount`] counts token units of a single asset; [`Value`]
//! measures worth in the vault's common valuation unit. Keeping the two as
//! distinct newtypes prevents mixing a token count with a valuation.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// A quantity of token units for a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    /// Zero units.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create an amount from a Decimal.
    #[must_use]
    pub const fn new(units: Decimal) -> Self {
        Self(units)
    }

    /// The inner unit count.
    #[must_use]
    pub const fn units(&self) -> Decimal {
        self.0
    }

    /// Returns true if this amount is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    /// Returns true if this amount is strictly positive.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Subtract without going negative; `None` when `rhs` exceeds `self`.
    #[must_use]
    pub fn checked_sub(&self, rhs: Self) -> Option<Self> {
        if rhs.0 > self.0 {
            None
        } else {
            Some(Self(self.0 - rhs.0))
        }
    }

    /// Ratio of `self` to `base`; `None` when `base` is zero.
    #[must_use]
    pub fn ratio_to(&self, base: Self) -> Option<Decimal> {
        if base.0 == Decimal::ZERO {
            None
        } else {
            Some(self.0 / base.0)
        }
    }

    /// The smaller of two amounts.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Amount {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul<Decimal> for Amount {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

/// Worth in the vault's common valuation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(Decimal);

impl Value {
    /// Zero value.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a value from a Decimal.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// The inner valuation.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if this value is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    /// Returns true if this value is strictly positive.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Absolute difference between two values.
    #[must_use]
    pub fn abs_diff(&self, other: Self) -> Self {
        Self((self.0 - other.0).abs())
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add for Value {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Value {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Value {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Value {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

/// A fee or bound expressed in basis points (1 bps = 0.01%).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BasisPoints(u32);

impl BasisPoints {
    /// Zero basis points.
    pub const ZERO: Self = Self(0);

    /// Create a basis-point quantity. Bounds are enforced at configuration
    /// time, not here.
    #[must_use]
    pub const fn new(bps: u32) -> Self {
        Self(bps)
    }

    /// The raw basis-point count.
    #[must_use]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// The fraction this represents (e.g. 250 bps -> 0.025).
    #[must_use]
    pub fn as_fraction(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(BPS_DENOMINATOR)
    }

    /// Returns true if this is zero basis points.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bps", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amount_arithmetic() {
        let a = Amount::new(dec!(100));
        let b = Amount::new(dec!(40));
        assert_eq!((a + b).units(), dec!(140));
        assert_eq!((a - b).units(), dec!(60));
        assert_eq!((a * dec!(0.5)).units(), dec!(50));
    }

    #[test]
    fn amount_checked_sub() {
        let a = Amount::new(dec!(10));
        let b = Amount::new(dec!(15));
        assert_eq!(b.checked_sub(a), Some(Amount::new(dec!(5))));
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(a.checked_sub(a), Some(Amount::ZERO));
    }

    #[test]
    fn amount_ratio_to() {
        let declared = Amount::new(dec!(10));
        let balance = Amount::new(dec!(50));
        assert_eq!(declared.ratio_to(balance), Some(dec!(0.2)));
        assert_eq!(declared.ratio_to(Amount::ZERO), None);
    }

    #[test]
    fn amount_min_and_ordering() {
        let a = Amount::new(dec!(1));
        let b = Amount::new(dec!(2));
        assert_eq!(a.min(b), a);
        assert!(a < b);
    }

    #[test]
    fn value_abs_diff() {
        let before = Value::new(dec!(100));
        let after = Value::new(dec!(99.5));
        assert_eq!(before.abs_diff(after), Value::new(dec!(0.5)));
        assert_eq!(after.abs_diff(before), Value::new(dec!(0.5)));
    }

    #[test]
    fn basis_points_fraction() {
        assert_eq!(BasisPoints::new(10_000).as_fraction(), dec!(1));
        assert_eq!(BasisPoints::new(250).as_fraction(), dec!(0.025));
        assert!(BasisPoints::ZERO.is_zero());
    }

    #[test]
    fn basis_points_display() {
        assert_eq!(format!("{}", BasisPoints::new(100)), "100 bps");
    }

    #[test]
    fn amount_serde_roundtrip() {
        let a = Amount::new(dec!(12.345));
        let json = serde_json::to_string(&a).unwrap();
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
