//! Order status lifecycle and ledger operation types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LoyaltyError;

/// Status of an accrual order as tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order uploaded, the accrual authority has not reported on it yet.
    New,
    /// The authority is calculating the accrual.
    Processing,
    /// The authority registered the order but has not started on it.
    Registered,
    /// The authority refused the order; no points are awarded.
    Invalid,
    /// Accrual calculated and credited to the owner.
    Processed,
}

impl OrderStatus {
    /// Statuses the poller still has to reconcile.
    pub const PENDING: [OrderStatus; 3] = [
        OrderStatus::New,
        OrderStatus::Processing,
        OrderStatus::Registered,
    ];

    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Check if the order still awaits reconciliation.
    pub fn is_pending(&self) -> bool {
        !self.is_final()
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[OrderStatus] {
        match self {
            OrderStatus::New => &[
                OrderStatus::Registered,
                OrderStatus::Processing,
                OrderStatus::Invalid,
                OrderStatus::Processed,
            ],
            OrderStatus::Registered => &[
                OrderStatus::Processing,
                OrderStatus::Invalid,
                OrderStatus::Processed,
            ],
            OrderStatus::Processing => &[
                OrderStatus::Registered,
                OrderStatus::Invalid,
                OrderStatus::Processed,
            ],
            OrderStatus::Invalid => &[],
            OrderStatus::Processed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(LoyaltyError::Persistence(format!(
                "unknown order status {other:?}"
            ))),
        }
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Points earned from an order, credited once the order is processed.
    Accrual,
    /// Points spent against an order number.
    Withdrawal,
}

impl OperationType {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Accrual => "ACCRUAL",
            OperationType::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCRUAL" => Ok(OperationType::Accrual),
            "WITHDRAWAL" => Ok(OperationType::Withdrawal),
            other => Err(LoyaltyError::Persistence(format!(
                "unknown operation type {other:?}"
            ))),
        }
    }
}
