//! Loyalty point amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use crate::error::LoyaltyError;

/// Number of decimal places points are stored with.
pub const POINTS_SCALE: u32 = 2;

/// A non-currency point amount with at most [`POINTS_SCALE`] decimal places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Points(Decimal);

impl Points {
    /// Zero points.
    pub const ZERO: Points = Points(Decimal::ZERO);

    /// Create from a decimal value, rounded to the storage scale.
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp(POINTS_SCALE))
    }

    /// Parse from a decimal string.
    pub fn parse(value: &str) -> Result<Self, LoyaltyError> {
        value
            .trim()
            .parse::<Decimal>()
            .map(Self::new)
            .map_err(|e| LoyaltyError::Validation {
                message: format!("invalid point amount {value:?}: {e}"),
                field: Some("sum".to_string()),
            })
    }

    /// Get the decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Check if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl From<Decimal> for Points {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<i64> for Points {
    fn from(value: i64) -> Self {
        Self::new(Decimal::from(value))
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <Decimal as Deserialize>::deserialize(deserializer).map(Self::new)
    }
}

impl Add for Points {
    type Output = Points;

    fn add(self, other: Points) -> Points {
        Points(self.0 + other.0)
    }
}

impl AddAssign for Points {
    fn add_assign(&mut self, other: Points) {
        self.0 += other.0;
    }
}

impl Sub for Points {
    type Output = Points;

    fn sub(self, other: Points) -> Points {
        Points(self.0 - other.0)
    }
}

impl SubAssign for Points {
    fn sub_assign(&mut self, other: Points) {
        self.0 -= other.0;
    }
}

impl Neg for Points {
    type Output = Points;

    fn neg(self) -> Points {
        Points(-self.0)
    }
}

impl std::iter::Sum for Points {
    fn sum<I: Iterator<Item = Points>>(iter: I) -> Points {
        iter.fold(Points::ZERO, |acc, p| acc + p)
    }
}
