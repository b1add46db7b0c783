use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// numeric value produced by expression evaluation
///
/// Amounts are fixed-precision decimals; division by zero yields
/// `Infinity`, which compares greater than every finite value so a
/// blown ratio fails any finite `<=` threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Finite(Decimal),
    Infinity,
}

impl Value {
    pub const ZERO: Value = Value::Finite(Decimal::ZERO);
    pub const ONE: Value = Value::Finite(Decimal::ONE);

    /// create from decimal
    pub fn from_decimal(d: Decimal) -> Self {
        Value::Finite(d)
    }

    /// create from integer amount
    pub fn from_int(amount: i64) -> Self {
        Value::Finite(Decimal::from(amount))
    }

    /// create from a json-shaped number; NaN and infinities map to Infinity
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            match Decimal::from_f64(v) {
                Some(d) => Value::Finite(d),
                None => Value::Infinity,
            }
        } else {
            Value::Infinity
        }
    }

    /// raw percent p becomes p/100
    pub fn from_percent(p: Decimal) -> Self {
        Value::Finite(p / Decimal::from(100))
    }

    /// get underlying decimal, if finite
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Finite(d) => Some(*d),
            Value::Infinity => None,
        }
    }

    /// finite value or zero
    pub fn finite_or_zero(&self) -> Decimal {
        self.as_decimal().unwrap_or(Decimal::ZERO)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Value::Infinity)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Value::Finite(d) if d.is_zero())
    }

    pub fn is_positive(&self) -> bool {
        match self {
            Value::Finite(d) => d.is_sign_positive() && !d.is_zero(),
            Value::Infinity => true,
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Value::Finite(d) if d.is_sign_negative() && !d.is_zero())
    }

    /// absolute value
    pub fn abs(&self) -> Self {
        match self {
            Value::Finite(d) => Value::Finite(d.abs()),
            Value::Infinity => Value::Infinity,
        }
    }

    /// round to specified decimal places
    pub fn round_dp(&self, dp: u32) -> Self {
        match self {
            Value::Finite(d) => Value::Finite(d.round_dp(dp)),
            Value::Infinity => Value::Infinity,
        }
    }

    /// minimum of two values
    pub fn min(self, other: Self) -> Self {
        match (self, other) {
            (Value::Finite(a), Value::Finite(b)) => Value::Finite(a.min(b)),
            (Value::Finite(a), Value::Infinity) => Value::Finite(a),
            (Value::Infinity, b) => b,
        }
    }

    /// maximum of two values
    pub fn max(self, other: Self) -> Self {
        match (self, other) {
            (Value::Finite(a), Value::Finite(b)) => Value::Finite(a.max(b)),
            _ => Value::Infinity,
        }
    }

    /// boolean projection: nonzero is true
    pub fn is_truthy(&self) -> bool {
        !self.is_zero()
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Finite(a), Value::Finite(b)) => a.partial_cmp(b),
            (Value::Infinity, Value::Infinity) => Some(Ordering::Equal),
            (Value::Infinity, Value::Finite(_)) => Some(Ordering::Greater),
            (Value::Finite(_), Value::Infinity) => Some(Ordering::Less),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Finite(d) => write!(f, "{}", d),
            Value::Infinity => write!(f, "Infinity"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Finite(d) => Serialize::serialize(d, serializer),
            Value::Infinity => serializer.serialize_str("Infinity"),
        }
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Finite(d)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::from_int(i)
    }
}

impl Add for Value {
    type Output = Value;

    fn add(self, other: Value) -> Value {
        match (self, other) {
            (Value::Finite(a), Value::Finite(b)) => Value::Finite(a + b),
            _ => Value::Infinity,
        }
    }
}

impl AddAssign for Value {
    fn add_assign(&mut self, other: Value) {
        *self = *self + other;
    }
}

impl Sub for Value {
    type Output = Value;

    fn sub(self, other: Value) -> Value {
        match (self, other) {
            (Value::Finite(a), Value::Finite(b)) => Value::Finite(a - b),
            _ => Value::Infinity,
        }
    }
}

impl SubAssign for Value {
    fn sub_assign(&mut self, other: Value) {
        *self = *self - other;
    }
}

impl Mul for Value {
    type Output = Value;

    fn mul(self, other: Value) -> Value {
        match (self, other) {
            (Value::Finite(a), Value::Finite(b)) => Value::Finite(a * b),
            _ => Value::Infinity,
        }
    }
}

impl Div for Value {
    type Output = Value;

    fn div(self, other: Value) -> Value {
        match (self, other) {
            (_, Value::Finite(b)) if b.is_zero() => Value::Infinity,
            (Value::Finite(a), Value::Finite(b)) => Value::Finite(a / b),
            (Value::Infinity, Value::Finite(_)) => Value::Infinity,
            // finite over infinity vanishes
            (Value::Finite(_), Value::Infinity) => Value::ZERO,
            (Value::Infinity, Value::Infinity) => Value::Infinity,
        }
    }
}

impl std::ops::Rem for Value {
    type Output = Value;

    fn rem(self, other: Value) -> Value {
        match (self, other) {
            (_, Value::Finite(b)) if b.is_zero() => Value::Infinity,
            (Value::Finite(a), Value::Finite(b)) => Value::Finite(a % b),
            (Value::Finite(a), Value::Infinity) => Value::Finite(a),
            (Value::Infinity, _) => Value::Infinity,
        }
    }
}

impl Neg for Value {
    type Output = Value;

    fn neg(self) -> Value {
        match self {
            Value::Finite(d) => Value::Finite(-d),
            Value::Infinity => Value::Infinity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_division_by_zero_is_infinite() {
        let v = Value::from_int(200) / Value::ZERO;
        assert!(v.is_infinite());
        assert!(v > Value::from_decimal(dec!(5.00)));
    }

    #[test]
    fn test_infinity_fails_finite_ceiling() {
        let threshold = Value::from_decimal(dec!(5.00));
        assert!(!(Value::Infinity <= threshold));
    }

    #[test]
    fn test_exact_ratio_comparison() {
        let leverage = Value::from_int(200_000_000) / Value::from_int(40_000_000);
        assert_eq!(leverage, Value::from_decimal(dec!(5)));
        assert!(leverage <= Value::from_decimal(dec!(5.00)));
    }

    #[test]
    fn test_percent_projection() {
        let p = Value::from_percent(dec!(12.5));
        assert_eq!(p, Value::from_decimal(dec!(0.125)));
    }

    #[test]
    fn test_min_max_with_infinity() {
        assert_eq!(Value::Infinity.min(Value::from_int(3)), Value::from_int(3));
        assert_eq!(Value::from_int(3).max(Value::Infinity), Value::Infinity);
    }
}
