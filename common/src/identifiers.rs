//! Identifier types for users and orders.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LoyaltyError;
use crate::luhn;

/// Unique identifier for a registered user.
/// Assigned by the ledger store at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw store identifier.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// An order number that has passed the Luhn check.
///
/// The only way to obtain one from untrusted input is [`OrderNumber::parse`],
/// so every `OrderNumber` reaching the ledger is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Validate and wrap an order number.
    pub fn parse(raw: &str) -> Result<Self, LoyaltyError> {
        let trimmed = raw.trim();
        if !luhn::is_valid(trimmed) {
            return Err(LoyaltyError::Validation {
                message: format!("order number {trimmed:?} fails the Luhn check"),
                field: Some("order".to_string()),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Wrap a number read back from the ledger without re-validating it.
    pub fn from_trusted(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OrderNumber {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
