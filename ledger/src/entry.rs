//! Ledger entries: accrual orders and withdrawals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loyalty_common::{OperationType, OrderNumber, OrderStatus, Points, UserId};

/// A single row of the ledger.
///
/// Accrual orders and withdrawals share one table; `operation` tells them
/// apart and `status` is only meaningful for accruals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Store-assigned row id, monotonically increasing.
    pub id: i64,
    /// Order number.
    pub number: OrderNumber,
    /// Owning user.
    pub user_id: UserId,
    /// Accrual or withdrawal.
    pub operation: OperationType,
    /// Reconciliation status.
    pub status: OrderStatus,
    /// Settled accrual, or the withdrawn sum.
    pub amount: Points,
    /// When the entry was created.
    pub uploaded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Contribution of this entry to the owner's current balance.
    ///
    /// Accruals count only once processed; withdrawals always count.
    pub fn signed_amount(&self) -> Points {
        match (self.operation, self.status) {
            (OperationType::Accrual, OrderStatus::Processed) => self.amount,
            (OperationType::Accrual, _) => Points::ZERO,
            (OperationType::Withdrawal, _) => -self.amount,
        }
    }

    /// Check if the entry is an accrual that still awaits reconciliation.
    pub fn is_pending_accrual(&self) -> bool {
        self.operation == OperationType::Accrual && self.status.is_pending()
    }
}

/// Result of a status transition request against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The new status (and amount, if any) was written.
    Applied,
    /// The order already had the requested status.
    Unchanged,
    /// The order was already in a final state; nothing was written.
    AlreadySettled(OrderStatus),
}

impl Transition {
    /// Check if the call changed the ledger.
    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(operation: OperationType, status: OrderStatus, amount: Points) -> LedgerEntry {
        LedgerEntry {
            id: 1,
            number: OrderNumber::from_trusted("12345678903"),
            user_id: UserId::new(1),
            operation,
            status,
            amount,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_signed_amount() {
        let amount = Points::new(dec!(500));

        assert_eq!(
            entry(OperationType::Accrual, OrderStatus::Processed, amount).signed_amount(),
            amount
        );
        assert_eq!(
            entry(OperationType::Accrual, OrderStatus::Processing, amount).signed_amount(),
            Points::ZERO
        );
        assert_eq!(
            entry(OperationType::Accrual, OrderStatus::Invalid, amount).signed_amount(),
            Points::ZERO
        );
        assert_eq!(
            entry(OperationType::Withdrawal, OrderStatus::Processed, amount).signed_amount(),
            -amount
        );
    }

    #[test]
    fn test_pending_accrual() {
        assert!(entry(OperationType::Accrual, OrderStatus::Registered, Points::ZERO)
            .is_pending_accrual());
        assert!(!entry(OperationType::Withdrawal, OrderStatus::New, Points::ZERO)
            .is_pending_accrual());
    }
}
