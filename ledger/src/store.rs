//! The ledger store abstraction.

use async_trait::async_trait;

use loyalty_common::{OperationType, OrderNumber, OrderStatus, Points, UserId};

use crate::balance::Balance;
use crate::entry::{LedgerEntry, Transition};
use crate::error::LedgerResult;
use crate::user::User;

/// Atomic primitives over the persisted user and order tables.
///
/// Implementations hold no business policy. Every mutating method runs as a
/// single transaction and leaves the store unchanged when it returns an error.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a user. Fails with `DuplicateLogin` if the login is taken.
    async fn register_user(&self, login: &str, password_hash: &str) -> LedgerResult<UserId>;

    /// Look a user up by login.
    async fn find_user_by_login(&self, login: &str) -> LedgerResult<User>;

    /// Find the accrual order with this number.
    async fn find_order(&self, number: &OrderNumber) -> LedgerResult<LedgerEntry>;

    /// Insert a new entry in status `NEW`.
    ///
    /// Uniqueness is enforced per operation type by the store itself: of any
    /// number of concurrent inserts of the same number, exactly one succeeds
    /// and the rest fail with `DuplicateNumber`.
    async fn insert_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
        operation: OperationType,
    ) -> LedgerResult<LedgerEntry>;

    /// Numbers of accrual orders awaiting reconciliation, oldest first.
    async fn list_pending_orders(&self, limit: usize) -> LedgerResult<Vec<OrderNumber>>;

    /// Record a non-final status reported by the accrual authority.
    ///
    /// No-op for orders already in a final state.
    async fn set_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> LedgerResult<Transition>;

    /// Mark the order `INVALID`. No-op if it is already final.
    async fn set_order_invalid(&self, number: &OrderNumber) -> LedgerResult<Transition>;

    /// Mark the order `PROCESSED` with its accrual and re-project the owner's
    /// balance in the same transaction. No-op if it is already final.
    async fn set_order_processed(
        &self,
        number: &OrderNumber,
        amount: Points,
    ) -> LedgerResult<Transition>;

    /// Project the user's balance from committed entries.
    async fn current_balance(&self, user_id: UserId) -> LedgerResult<Balance>;

    /// Check the balance and record a withdrawal in one transaction.
    ///
    /// The user row is locked for the duration, serializing this against
    /// concurrent settlements and withdrawals of the same user.
    async fn record_withdrawal(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        sum: Points,
    ) -> LedgerResult<LedgerEntry>;

    /// The user's accrual orders, oldest first.
    async fn list_orders(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntry>>;

    /// The user's withdrawals, oldest first.
    async fn list_withdrawals(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntry>>;
}
