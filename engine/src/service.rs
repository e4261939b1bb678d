//! Loyalty service facade.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument};

use loyalty_accrual::AccrualProvider;
use loyalty_common::{LoyaltyError, Points, Result, UserId};
use loyalty_ledger::{Balance, LedgerEntry, LedgerStore, User};

use crate::admission::{OrderAdmission, SubmitOutcome};
use crate::config::EngineConfig;
use crate::metrics::{Metrics, SharedMetrics};
use crate::poller::{AccrualPoller, CycleReport};
use crate::state::EngineState;
use crate::withdrawal::{WithdrawOutcome, WithdrawalEngine};

/// The loyalty engine: admission, withdrawals, balances and the background
/// accrual poller over one ledger store.
pub struct LoyaltyService {
    /// Configuration.
    config: EngineConfig,
    /// Ledger store shared by all components.
    store: Arc<dyn LedgerStore>,
    /// Order admission.
    admission: OrderAdmission,
    /// Withdrawal engine.
    withdrawals: WithdrawalEngine,
    /// Background reconciliation.
    poller: Arc<AccrualPoller>,
    /// Current state.
    state: RwLock<EngineState>,
    /// Counters.
    metrics: SharedMetrics,
}

impl LoyaltyService {
    /// Create a new service. The poller does not run until [`LoyaltyService::start`].
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn AccrualProvider>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let poller = Arc::new(AccrualPoller::new(
            config.poller.clone(),
            store.clone(),
            provider,
            metrics.clone(),
        ));

        Self {
            config,
            admission: OrderAdmission::new(store.clone()),
            withdrawals: WithdrawalEngine::new(store.clone()),
            store,
            poller,
            state: RwLock::new(EngineState::Starting),
            metrics,
        }
    }

    /// Start the background poller.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.config.validate()?;

        let state = self.state();
        if state != EngineState::Starting {
            return Err(LoyaltyError::Configuration(format!(
                "cannot start engine in state {state:?}"
            )));
        }

        self.poller.start();
        *self.state.write() = EngineState::Running;

        info!(
            workers = self.config.poller.workers,
            accrual_address = %self.config.accrual_address,
            "Loyalty engine started"
        );
        Ok(())
    }

    /// Stop the poller, draining in-flight work.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        info!("Stopping loyalty engine");

        *self.state.write() = EngineState::ShuttingDown;
        self.poller.shutdown().await;
        *self.state.write() = EngineState::Stopped;

        info!("Loyalty engine stopped");
        Ok(())
    }

    /// Register a user with an already hashed credential.
    #[instrument(skip(self, password_hash))]
    pub async fn register_user(&self, login: &str, password_hash: &str) -> Result<UserId> {
        Ok(self.store.register_user(login, password_hash).await?)
    }

    /// Look a user up by login.
    pub async fn find_user(&self, login: &str) -> Result<User> {
        Ok(self.store.find_user_by_login(login).await?)
    }

    /// Submit an order number for accrual.
    pub async fn submit(&self, user_id: UserId, number: &str) -> Result<SubmitOutcome> {
        self.metrics.order_submitted();
        let outcome = self.admission.submit(user_id, number).await?;
        match outcome {
            SubmitOutcome::Accepted => self.metrics.order_accepted(),
            SubmitOutcome::Invalid => self.metrics.order_invalid(),
            SubmitOutcome::OwnedByOther => self.metrics.order_conflicted(),
            SubmitOutcome::AlreadyOwnedByUser => {}
        }
        Ok(outcome)
    }

    /// Withdraw points against an order number.
    pub async fn withdraw(&self, user_id: UserId, number: &str, sum: Points) -> Result<WithdrawOutcome> {
        self.metrics.withdrawal_requested();
        let outcome = self.withdrawals.withdraw(user_id, number, sum).await?;
        match &outcome {
            WithdrawOutcome::Ok(_) => self.metrics.withdrawal_success(),
            WithdrawOutcome::InsufficientFunds => self.metrics.withdrawal_insufficient(),
            WithdrawOutcome::Invalid | WithdrawOutcome::NumberAlreadyUsed => {
                self.metrics.withdrawal_rejected()
            }
        }
        Ok(outcome)
    }

    /// The user's accrual orders, oldest first.
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.list_orders(user_id).await?)
    }

    /// The user's projected balance.
    pub async fn balance(&self, user_id: UserId) -> Result<Balance> {
        Ok(self.store.current_balance(user_id).await?)
    }

    /// The user's withdrawals, oldest first.
    pub async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.list_withdrawals(user_id).await?)
    }

    /// Run one reconciliation cycle now.
    ///
    /// Spawns the worker pool if needed. Serialized with the periodic loop.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        self.config.validate()?;
        self.poller.start_workers();
        self.poller.run_cycle().await
    }

    /// Get the background poller.
    pub fn poller(&self) -> &Arc<AccrualPoller> {
        &self.poller
    }

    /// Get the current engine state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Get the shared metrics.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_accrual::{AccrualReport, MockAccrualProvider};
    use loyalty_common::OrderStatus;
    use loyalty_ledger::InMemoryLedger;
    use rust_decimal_macros::dec;

    fn service() -> (LoyaltyService, Arc<MockAccrualProvider>) {
        let provider = Arc::new(MockAccrualProvider::new());
        let service = LoyaltyService::new(
            EngineConfig::default(),
            Arc::new(InMemoryLedger::new()),
            provider.clone(),
        );
        (service, provider)
    }

    #[tokio::test]
    async fn test_service_start_stop() {
        let (service, _) = service();
        assert_eq!(service.state(), EngineState::Starting);

        service.start().await.unwrap();
        assert_eq!(service.state(), EngineState::Running);
        assert!(service.state().is_operational());
        assert!(service.poller().is_running());
        assert!(service.start().await.is_err());

        service.stop().await.unwrap();
        assert_eq!(service.state(), EngineState::Stopped);
        assert!(!service.state().is_operational());
        assert!(!service.poller().is_running());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let mut config = EngineConfig::default();
        config.poller.workers = 0;
        let service = LoyaltyService::new(
            config,
            Arc::new(InMemoryLedger::new()),
            Arc::new(MockAccrualProvider::new()),
        );

        let err = service.start().await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert_eq!(service.state(), EngineState::Starting);
        assert!(!service.poller().is_running());
        assert!(service.poll_once().await.is_err());
    }

    #[tokio::test]
    async fn test_balance_of_unknown_user() {
        let (service, _) = service();
        let err = service.balance(UserId::new(42)).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_accrue_then_withdraw() {
        let (service, provider) = service();
        let user = service.register_user("alice", "h").await.unwrap();

        assert_eq!(
            service.submit(user, "12345678903").await.unwrap(),
            SubmitOutcome::Accepted
        );
        provider.set_reply(
            "12345678903",
            Ok(AccrualReport::processed("12345678903", dec!(500))),
        );

        let report = service.poll_once().await.unwrap();
        assert_eq!(report.processed, 1);

        let orders = service.list_orders(user).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Processed);
        assert_eq!(orders[0].amount, Points::new(dec!(500)));
        assert_eq!(
            service.balance(user).await.unwrap().current,
            Points::new(dec!(500))
        );

        let outcome = service
            .withdraw(user, "346436439", Points::new(dec!(200)))
            .await
            .unwrap();
        assert!(outcome.is_ok());

        let balance = service.balance(user).await.unwrap();
        assert_eq!(balance.current, Points::new(dec!(300)));
        assert_eq!(balance.withdrawn, Points::new(dec!(200)));

        let withdrawals = service.list_withdrawals(user).await.unwrap();
        assert_eq!(withdrawals.len(), 1);
        assert_eq!(withdrawals[0].amount, Points::new(dec!(200)));
        assert_eq!(withdrawals[0].number.as_str(), "346436439");

        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.orders_accepted, 1);
        assert_eq!(snapshot.withdrawals_success, 1);
        assert_eq!(snapshot.orders_processed, 1);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_contested_order() {
        let (service, _) = service();
        let alice = service.register_user("alice", "h").await.unwrap();
        let bob = service.register_user("bob", "h").await.unwrap();

        service.submit(alice, "79927398713").await.unwrap();
        assert_eq!(
            service.submit(bob, "79927398713").await.unwrap(),
            SubmitOutcome::OwnedByOther
        );
        assert_eq!(service.list_orders(alice).await.unwrap().len(), 1);
        assert!(service.list_orders(bob).await.unwrap().is_empty());
        assert_eq!(service.metrics().snapshot().orders_conflicted, 1);
    }

    #[tokio::test]
    async fn test_duplicate_login() {
        let (service, _) = service();
        service.register_user("alice", "h").await.unwrap();
        let err = service.register_user("alice", "h").await.unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");
        assert_eq!(service.find_user("alice").await.unwrap().login, "alice");
    }
}
