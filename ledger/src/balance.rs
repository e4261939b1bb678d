//! Balance projection over ledger entries.

use serde::{Deserialize, Serialize};

use loyalty_common::{OperationType, Points};

use crate::entry::LedgerEntry;

/// A user's balance as derived from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Points available for withdrawal.
    pub current: Points,
    /// Total points withdrawn so far.
    pub withdrawn: Points,
}

impl Balance {
    /// Check if the balance covers a withdrawal of `sum`.
    pub fn has_sufficient_funds(&self, sum: Points) -> bool {
        self.current >= sum
    }
}

/// The rule that turns committed ledger entries into a balance.
///
/// `current = Σ processed accruals − Σ withdrawals` and
/// `withdrawn = Σ withdrawals`. Stores apply this rule inside the same
/// transaction that commits a balance-affecting entry, so the balance can
/// never reflect an order twice.
pub struct BalanceProjector;

impl BalanceProjector {
    /// Project the balance of one user's entries.
    pub fn project<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Balance {
        entries
            .into_iter()
            .fold(Balance::default(), |mut balance, entry| {
                balance.current += entry.signed_amount();
                if entry.operation == OperationType::Withdrawal {
                    balance.withdrawn += entry.amount;
                }
                balance
            })
    }

    /// SQL form of [`BalanceProjector::project`] for one user (`$1`).
    pub const PROJECTION_SQL: &'static str = r#"
        SELECT
            COALESCE(SUM(CASE WHEN operation_type = 'ACCRUAL' AND status = 'PROCESSED' THEN amount ELSE 0 END), 0)
          - COALESCE(SUM(CASE WHEN operation_type = 'WITHDRAWAL' THEN amount ELSE 0 END), 0) AS current,
            COALESCE(SUM(CASE WHEN operation_type = 'WITHDRAWAL' THEN amount ELSE 0 END), 0) AS withdrawn
        FROM orders
        WHERE user_id = $1
    "#;

    /// Rewrites the cached `users.balance` column from the projection.
    pub const REFRESH_SQL: &'static str = r#"
        UPDATE users
        SET balance = (
            SELECT
                COALESCE(SUM(CASE WHEN operation_type = 'ACCRUAL' AND status = 'PROCESSED' THEN amount ELSE 0 END), 0)
              - COALESCE(SUM(CASE WHEN operation_type = 'WITHDRAWAL' THEN amount ELSE 0 END), 0)
            FROM orders
            WHERE user_id = $1
        )
        WHERE id = $1
        RETURNING balance
    "#;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loyalty_common::{OrderNumber, OrderStatus, UserId};
    use rust_decimal_macros::dec;

    fn entry(id: i64, operation: OperationType, status: OrderStatus, amount: Points) -> LedgerEntry {
        LedgerEntry {
            id,
            number: OrderNumber::from_trusted(format!("{id}")),
            user_id: UserId::new(1),
            operation,
            status,
            amount,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_projection() {
        let entries = vec![
            entry(1, OperationType::Accrual, OrderStatus::Processed, Points::new(dec!(500))),
            entry(2, OperationType::Accrual, OrderStatus::Processing, Points::ZERO),
            entry(3, OperationType::Accrual, OrderStatus::Processed, Points::new(dec!(729.98))),
            entry(4, OperationType::Withdrawal, OrderStatus::Processed, Points::new(dec!(200))),
            entry(5, OperationType::Accrual, OrderStatus::Invalid, Points::ZERO),
        ];

        let balance = BalanceProjector::project(&entries);
        assert_eq!(balance.current, Points::new(dec!(1029.98)));
        assert_eq!(balance.withdrawn, Points::new(dec!(200)));
        assert!(balance.has_sufficient_funds(Points::new(dec!(1029.98))));
        assert!(!balance.has_sufficient_funds(Points::new(dec!(1029.99))));
    }

    #[test]
    fn test_empty_projection_is_zero() {
        let balance = BalanceProjector::project(std::iter::empty());
        assert_eq!(balance, Balance::default());
    }
}
