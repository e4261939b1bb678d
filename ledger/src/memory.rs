//! In-memory ledger store for tests and simulation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use loyalty_common::{OperationType, OrderNumber, OrderStatus, Points, UserId};

use crate::balance::{Balance, BalanceProjector};
use crate::entry::{LedgerEntry, Transition};
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;
use crate::user::User;

#[derive(Default)]
struct State {
    users: Vec<User>,
    entries: Vec<LedgerEntry>,
    index: HashMap<(OrderNumber, OperationType), usize>,
    next_user_id: i64,
    next_entry_id: i64,
}

impl State {
    fn user_exists(&self, user_id: UserId) -> bool {
        self.users.iter().any(|u| u.id == user_id)
    }

    fn accrual_mut(&mut self, number: &OrderNumber) -> LedgerResult<&mut LedgerEntry> {
        let idx = *self
            .index
            .get(&(number.clone(), OperationType::Accrual))
            .ok_or_else(|| LedgerError::NotFound(format!("order {number}")))?;
        Ok(&mut self.entries[idx])
    }

    fn project(&self, user_id: UserId) -> Balance {
        BalanceProjector::project(self.entries.iter().filter(|e| e.user_id == user_id))
    }

    fn insert(
        &mut self,
        number: &OrderNumber,
        user_id: UserId,
        operation: OperationType,
        status: OrderStatus,
        amount: Points,
    ) -> LedgerResult<LedgerEntry> {
        if !self.user_exists(user_id) {
            return Err(LedgerError::NotFound(format!("user {user_id}")));
        }
        let key = (number.clone(), operation);
        if self.index.contains_key(&key) {
            return Err(LedgerError::DuplicateNumber(number.clone()));
        }

        self.next_entry_id += 1;
        let entry = LedgerEntry {
            id: self.next_entry_id,
            number: number.clone(),
            user_id,
            operation,
            status,
            amount,
            uploaded_at: Utc::now(),
        };
        self.index.insert(key, self.entries.len());
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn list(&self, user_id: UserId, operation: OperationType) -> Vec<LedgerEntry> {
        // Entries are appended in id order, which is also upload order.
        self.entries
            .iter()
            .filter(|e| e.user_id == user_id && e.operation == operation)
            .cloned()
            .collect()
    }
}

/// Ledger store held in process memory.
///
/// One mutex guards all state, so every operation is serializable and
/// atomic. Behaves like [`crate::PostgresLedger`] for everything the
/// engine relies on.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries of every user, in insertion order.
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.state.lock().entries.clone()
    }

    /// All registered users.
    pub fn users(&self) -> Vec<User> {
        self.state.lock().users.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn register_user(&self, login: &str, password_hash: &str) -> LedgerResult<UserId> {
        let mut state = self.state.lock();
        if state.users.iter().any(|u| u.login == login) {
            return Err(LedgerError::DuplicateLogin(login.to_string()));
        }
        state.next_user_id += 1;
        let id = UserId::new(state.next_user_id);
        state.users.push(User {
            id,
            login: login.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_user_by_login(&self, login: &str) -> LedgerResult<User> {
        self.state
            .lock()
            .users
            .iter()
            .find(|u| u.login == login)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("user {login:?}")))
    }

    async fn find_order(&self, number: &OrderNumber) -> LedgerResult<LedgerEntry> {
        let mut state = self.state.lock();
        let entry = state.accrual_mut(number)?;
        Ok(entry.clone())
    }

    async fn insert_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
        operation: OperationType,
    ) -> LedgerResult<LedgerEntry> {
        self.state
            .lock()
            .insert(number, user_id, operation, OrderStatus::New, Points::ZERO)
    }

    async fn list_pending_orders(&self, limit: usize) -> LedgerResult<Vec<OrderNumber>> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .filter(|e| e.is_pending_accrual())
            .take(limit)
            .map(|e| e.number.clone())
            .collect())
    }

    async fn set_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> LedgerResult<Transition> {
        match status {
            OrderStatus::Invalid => return self.set_order_invalid(number).await,
            OrderStatus::Processed => return self.set_order_processed(number, Points::ZERO).await,
            _ => {}
        }

        let mut state = self.state.lock();
        let entry = state.accrual_mut(number)?;
        if entry.status.is_final() {
            return Ok(Transition::AlreadySettled(entry.status));
        }
        if entry.status == status {
            return Ok(Transition::Unchanged);
        }
        entry.status = status;
        Ok(Transition::Applied)
    }

    async fn set_order_invalid(&self, number: &OrderNumber) -> LedgerResult<Transition> {
        let mut state = self.state.lock();
        let entry = state.accrual_mut(number)?;
        if entry.status.is_final() {
            return Ok(Transition::AlreadySettled(entry.status));
        }
        entry.status = OrderStatus::Invalid;
        Ok(Transition::Applied)
    }

    async fn set_order_processed(
        &self,
        number: &OrderNumber,
        amount: Points,
    ) -> LedgerResult<Transition> {
        let mut state = self.state.lock();
        let entry = state.accrual_mut(number)?;
        if entry.status.is_final() {
            return Ok(Transition::AlreadySettled(entry.status));
        }
        entry.status = OrderStatus::Processed;
        entry.amount = amount;
        let user_id = entry.user_id;

        let balance = state.project(user_id);
        debug!(number = %number, user_id = %user_id, balance = %balance.current, "Order processed");
        Ok(Transition::Applied)
    }

    async fn current_balance(&self, user_id: UserId) -> LedgerResult<Balance> {
        let state = self.state.lock();
        if !state.user_exists(user_id) {
            return Err(LedgerError::NotFound(format!("user {user_id}")));
        }
        Ok(state.project(user_id))
    }

    async fn record_withdrawal(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        sum: Points,
    ) -> LedgerResult<LedgerEntry> {
        let mut state = self.state.lock();
        if !state.user_exists(user_id) {
            return Err(LedgerError::NotFound(format!("user {user_id}")));
        }

        let balance = state.project(user_id);
        if !balance.has_sufficient_funds(sum) {
            return Err(LedgerError::InsufficientFunds {
                required: sum,
                available: balance.current,
            });
        }

        state.insert(
            number,
            user_id,
            OperationType::Withdrawal,
            OrderStatus::Processed,
            sum,
        )
    }

    async fn list_orders(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.state.lock().list(user_id, OperationType::Accrual))
    }

    async fn list_withdrawals(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.state.lock().list(user_id, OperationType::Withdrawal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_find_user() {
        let ledger = InMemoryLedger::new();
        let id = ledger.register_user("alice", "h").await.unwrap();

        let user = ledger.find_user_by_login("alice").await.unwrap();
        assert_eq!(user.id, id);
        assert!(matches!(
            ledger.register_user("alice", "h").await,
            Err(LedgerError::DuplicateLogin(_))
        ));
        assert!(matches!(
            ledger.find_user_by_login("bob").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_is_unique_per_operation() {
        let ledger = InMemoryLedger::new();
        let user = ledger.register_user("alice", "h").await.unwrap();
        let n = number("12345678903");

        let entry = ledger
            .insert_order(&n, user, OperationType::Accrual)
            .await
            .unwrap();
        assert_eq!(entry.status, OrderStatus::New);
        assert_eq!(entry.amount, Points::ZERO);

        assert!(matches!(
            ledger.insert_order(&n, user, OperationType::Accrual).await,
            Err(LedgerError::DuplicateNumber(_))
        ));
        // Same number in the withdrawal domain is a different row.
        ledger
            .insert_order(&n, user, OperationType::Withdrawal)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_inserts_one_winner() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut users = Vec::new();
        for i in 0..8 {
            users.push(ledger.register_user(&format!("u{i}"), "h").await.unwrap());
        }

        let n = number("79927398713");
        let mut handles = Vec::new();
        for user in users {
            let ledger = ledger.clone();
            let n = n.clone();
            handles.push(tokio::spawn(async move {
                ledger.insert_order(&n, user, OperationType::Accrual).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::DuplicateNumber(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_processed_applies_once() {
        let ledger = InMemoryLedger::new();
        let user = ledger.register_user("alice", "h").await.unwrap();
        let n = number("12345678903");
        ledger
            .insert_order(&n, user, OperationType::Accrual)
            .await
            .unwrap();

        let first = ledger
            .set_order_processed(&n, Points::new(dec!(500)))
            .await
            .unwrap();
        let second = ledger
            .set_order_processed(&n, Points::new(dec!(700)))
            .await
            .unwrap();

        assert_eq!(first, Transition::Applied);
        assert_eq!(second, Transition::AlreadySettled(OrderStatus::Processed));
        let balance = ledger.current_balance(user).await.unwrap();
        assert_eq!(balance.current, Points::new(dec!(500)));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let ledger = InMemoryLedger::new();
        let user = ledger.register_user("alice", "h").await.unwrap();
        let n = number("12345678903");
        ledger
            .insert_order(&n, user, OperationType::Accrual)
            .await
            .unwrap();

        assert_eq!(
            ledger
                .set_order_status(&n, OrderStatus::Processing)
                .await
                .unwrap(),
            Transition::Applied
        );
        assert_eq!(
            ledger
                .set_order_status(&n, OrderStatus::Processing)
                .await
                .unwrap(),
            Transition::Unchanged
        );
        assert_eq!(
            ledger.set_order_invalid(&n).await.unwrap(),
            Transition::Applied
        );
        assert_eq!(
            ledger
                .set_order_status(&n, OrderStatus::Registered)
                .await
                .unwrap(),
            Transition::AlreadySettled(OrderStatus::Invalid)
        );
        assert_eq!(
            ledger
                .set_order_processed(&n, Points::new(dec!(10)))
                .await
                .unwrap(),
            Transition::AlreadySettled(OrderStatus::Invalid)
        );
        assert!(ledger.list_pending_orders(10).await.unwrap().is_empty());
        assert!(matches!(
            ledger.set_order_invalid(&number("79927398713")).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_orders_oldest_first() {
        let ledger = InMemoryLedger::new();
        let user = ledger.register_user("alice", "h").await.unwrap();
        let numbers = ["12345678903", "79927398713", "4561261212345467"];
        for raw in numbers {
            ledger
                .insert_order(&number(raw), user, OperationType::Accrual)
                .await
                .unwrap();
        }
        ledger
            .insert_order(&number("346436439"), user, OperationType::Withdrawal)
            .await
            .unwrap();

        let pending = ledger.list_pending_orders(2).await.unwrap();
        assert_eq!(pending, vec![number(numbers[0]), number(numbers[1])]);

        ledger
            .set_order_processed(&number(numbers[0]), Points::ZERO)
            .await
            .unwrap();
        let pending = ledger.list_pending_orders(10).await.unwrap();
        assert_eq!(pending, vec![number(numbers[1]), number(numbers[2])]);
    }

    #[tokio::test]
    async fn test_withdrawal_checks_balance() {
        let ledger = InMemoryLedger::new();
        let user = ledger.register_user("alice", "h").await.unwrap();
        let n = number("12345678903");
        ledger
            .insert_order(&n, user, OperationType::Accrual)
            .await
            .unwrap();
        ledger
            .set_order_processed(&n, Points::new(dec!(500)))
            .await
            .unwrap();

        let w = number("346436439");
        let entry = ledger
            .record_withdrawal(user, &w, Points::new(dec!(200)))
            .await
            .unwrap();
        assert_eq!(entry.operation, OperationType::Withdrawal);
        assert_eq!(entry.status, OrderStatus::Processed);

        let err = ledger
            .record_withdrawal(user, &number("79927398713"), Points::new(dec!(300.01)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        assert!(matches!(
            ledger
                .record_withdrawal(user, &w, Points::new(dec!(1)))
                .await,
            Err(LedgerError::DuplicateNumber(_))
        ));

        let balance = ledger.current_balance(user).await.unwrap();
        assert_eq!(balance.current, Points::new(dec!(300)));
        assert_eq!(balance.withdrawn, Points::new(dec!(200)));
        assert_eq!(ledger.list_withdrawals(user).await.unwrap().len(), 1);
        assert_eq!(ledger.list_orders(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_balance_of_unknown_user() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(
            ledger.current_balance(UserId::new(999)).await,
            Err(LedgerError::NotFound(_))
        ));

        let user = ledger.register_user("alice", "h").await.unwrap();
        assert_eq!(ledger.current_balance(user).await.unwrap(), Balance::default());
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user = ledger.register_user("alice", "h").await.unwrap();
        let n = number("12345678903");
        ledger
            .insert_order(&n, user, OperationType::Accrual)
            .await
            .unwrap();
        ledger
            .set_order_processed(&n, Points::new(dec!(100)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10u32 {
            let ledger = ledger.clone();
            let w = OrderNumber::from_trusted(
                loyalty_common::luhn::complete(&format!("9000{i}")).unwrap(),
            );
            handles.push(tokio::spawn(async move {
                ledger
                    .record_withdrawal(user, &w, Points::new(dec!(30)))
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 3);
        let balance = ledger.current_balance(user).await.unwrap();
        assert_eq!(balance.current, Points::new(dec!(10)));
        assert!(!balance.current.is_negative());
    }
}
