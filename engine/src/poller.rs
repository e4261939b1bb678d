//! Accrual poller: reconciles pending orders with the accrual authority.
//!
//! A fixed pool of workers consumes jobs from a bounded channel. Each cycle
//! fetches up to `workers` pending orders (oldest first), hands them to the
//! pool and waits for every reply, so cycles never overlap and an order is
//! never in flight twice. Per-order failures are logged and the order stays
//! pending for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use loyalty_accrual::{AccrualError, AccrualProvider, AccrualReport, AccrualStatus, RateGate};
use loyalty_common::{LoyaltyError, OrderNumber, Result};
use loyalty_ledger::{LedgerStore, Transition};

use crate::config::PollerConfig;
use crate::metrics::SharedMetrics;

/// What happened to one order during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    /// Settled as processed and credited.
    Processed,
    /// Settled as invalid.
    Invalidated,
    /// A new non-final status was recorded.
    StatusUpdated,
    /// Nothing to write: same status, or already settled.
    Unchanged,
    /// The authority rate-limited us; calls are suspended.
    RateLimited,
    /// The call or the write failed; retried next cycle.
    Failed,
    /// Shutdown interrupted the job before the call was made.
    Abandoned,
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub dispatched: usize,
    pub processed: usize,
    pub invalidated: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rate_limited: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: OrderOutcome) {
        match outcome {
            OrderOutcome::Processed => self.processed += 1,
            OrderOutcome::Invalidated => self.invalidated += 1,
            OrderOutcome::StatusUpdated => self.updated += 1,
            OrderOutcome::Unchanged => self.unchanged += 1,
            OrderOutcome::RateLimited => self.rate_limited += 1,
            OrderOutcome::Failed => self.failed += 1,
            OrderOutcome::Abandoned => self.abandoned += 1,
        }
    }

    /// Orders whose reconciliation went through without error.
    pub fn succeeded(&self) -> usize {
        self.processed + self.invalidated + self.updated + self.unchanged
    }
}

struct Job {
    number: OrderNumber,
    reply: oneshot::Sender<OrderOutcome>,
}

/// State shared by every worker.
struct WorkerContext {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn AccrualProvider>,
    gate: Arc<RateGate>,
    metrics: SharedMetrics,
    request_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl WorkerContext {
    async fn reconcile(&self, number: &OrderNumber) -> OrderOutcome {
        if *self.shutdown.borrow() {
            return OrderOutcome::Abandoned;
        }
        if !self.gate.is_open() {
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = self.gate.wait() => {}
                _ = shutdown.wait_for(|stop| *stop) => return OrderOutcome::Abandoned,
            }
        }

        self.metrics.accrual_call();
        let result = match timeout(self.request_timeout, self.provider.fetch(number)).await {
            Ok(result) => result,
            Err(_) => Err(AccrualError::Timeout),
        };

        match result {
            Ok(report) => self.apply(number, report).await,
            Err(AccrualError::RateLimited { retry_after }) => {
                warn!(
                    number = %number,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Accrual authority rate limit hit"
                );
                self.gate.suspend(retry_after);
                self.metrics.accrual_rate_limited();
                OrderOutcome::RateLimited
            }
            Err(AccrualError::NotRegistered(_)) => {
                debug!(number = %number, "Order not yet registered with accrual authority");
                OrderOutcome::Unchanged
            }
            Err(e) => {
                warn!(number = %number, error = %e, "Accrual call failed");
                self.metrics.accrual_failure();
                OrderOutcome::Failed
            }
        }
    }

    async fn apply(&self, number: &OrderNumber, report: AccrualReport) -> OrderOutcome {
        if report.order != number.as_str() {
            warn!(number = %number, reported = %report.order, "Accrual reply is for another order");
            self.metrics.accrual_failure();
            return OrderOutcome::Failed;
        }

        let written = match report.status {
            AccrualStatus::Processed => {
                let amount = report.points();
                if amount.is_negative() {
                    warn!(number = %number, accrual = %amount, "Negative accrual ignored");
                    self.metrics.accrual_failure();
                    return OrderOutcome::Failed;
                }
                self.store
                    .set_order_processed(number, amount)
                    .await
                    .map(|t| (t, OrderOutcome::Processed))
            }
            AccrualStatus::Invalid => self
                .store
                .set_order_invalid(number)
                .await
                .map(|t| (t, OrderOutcome::Invalidated)),
            AccrualStatus::Registered | AccrualStatus::Processing => self
                .store
                .set_order_status(number, report.status.into())
                .await
                .map(|t| (t, OrderOutcome::StatusUpdated)),
        };

        match written {
            Ok((Transition::Applied, outcome)) => {
                match outcome {
                    OrderOutcome::Processed => self.metrics.order_processed(),
                    OrderOutcome::Invalidated => self.metrics.order_rejected(),
                    _ => {}
                }
                debug!(number = %number, status = ?report.status, "Order reconciled");
                outcome
            }
            Ok((Transition::Unchanged | Transition::AlreadySettled(_), _)) => OrderOutcome::Unchanged,
            Err(e) => {
                error!(number = %number, error = %e, "Failed to record accrual result");
                self.metrics.accrual_failure();
                OrderOutcome::Failed
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    jobs: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    ctx: Arc<WorkerContext>,
) {
    debug!(worker = id, "Accrual worker started");
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else { break };

        let outcome = ctx.reconcile(&job.number).await;
        // The cycle may have given up on this reply during shutdown.
        let _ = job.reply.send(outcome);
    }
    debug!(worker = id, "Accrual worker stopped");
}

/// Background reconciliation of pending orders.
pub struct AccrualPoller {
    config: PollerConfig,
    store: Arc<dyn LedgerStore>,
    ctx: Arc<WorkerContext>,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
    cycle_lock: AsyncMutex<()>,
    shutdown: watch::Sender<bool>,
}

impl AccrualPoller {
    /// Create a poller. Nothing runs until [`AccrualPoller::start`].
    pub fn new(
        config: PollerConfig,
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn AccrualProvider>,
        metrics: SharedMetrics,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            provider,
            gate: Arc::new(RateGate::new()),
            metrics,
            request_timeout: config.request_timeout,
            shutdown: shutdown_rx,
        });

        Self {
            config,
            store,
            ctx,
            jobs: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            run_loop: Mutex::new(None),
            cycle_lock: AsyncMutex::new(()),
            shutdown,
        }
    }

    /// The rate gate shared by all workers.
    pub fn gate(&self) -> &RateGate {
        &self.ctx.gate
    }

    /// Check if the worker pool is up.
    pub fn is_running(&self) -> bool {
        self.jobs.lock().is_some()
    }

    /// Spawn the worker pool without the periodic loop. Idempotent.
    ///
    /// A poller that has been shut down cannot be restarted.
    pub fn start_workers(&self) {
        let mut jobs = self.jobs.lock();
        if jobs.is_some() || *self.shutdown.borrow() {
            return;
        }

        let (tx, rx) = mpsc::channel(self.config.workers);
        let rx = Arc::new(AsyncMutex::new(rx));
        let mut workers = self.workers.lock();
        for id in 0..self.config.workers {
            workers.push(tokio::spawn(worker_loop(id, rx.clone(), self.ctx.clone())));
        }
        *jobs = Some(tx);

        info!(workers = self.config.workers, "Accrual worker pool started");
    }

    /// Spawn the worker pool and the periodic poll loop.
    pub fn start(self: &Arc<Self>) {
        self.start_workers();

        let mut run_loop = self.run_loop.lock();
        if run_loop.is_some() || !self.is_running() {
            return;
        }
        let poller = self.clone();
        *run_loop = Some(tokio::spawn(async move { poller.run().await }));
    }

    async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.config.interval.as_millis() as u64, "Accrual poll loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) if report.dispatched > 0 => info!(
                    dispatched = report.dispatched,
                    processed = report.processed,
                    invalidated = report.invalidated,
                    failed = report.failed,
                    rate_limited = report.rate_limited,
                    "Poll cycle complete"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Poll cycle failed"),
            }
        }
        info!("Accrual poll loop stopped");
    }

    /// Run one reconciliation cycle and wait for all of its jobs.
    ///
    /// Concurrent callers are serialized.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;

        let sender = self.jobs.lock().clone().ok_or_else(|| {
            LoyaltyError::Configuration("accrual worker pool is not running".to_string())
        })?;

        let pending = self
            .store
            .list_pending_orders(self.config.workers)
            .await
            .map_err(LoyaltyError::from)?;

        let mut report = CycleReport::default();
        let mut replies = Vec::with_capacity(pending.len());
        for number in pending {
            let (reply, rx) = oneshot::channel();
            if sender.send(Job { number, reply }).await.is_err() {
                break;
            }
            replies.push(rx);
        }
        drop(sender);
        report.dispatched = replies.len();

        for rx in replies {
            match rx.await {
                Ok(outcome) => report.record(outcome),
                Err(_) => report.record(OrderOutcome::Abandoned),
            }
        }

        self.ctx.metrics.poll_cycle();
        Ok(report)
    }

    /// Stop the loop, close the job channel and join the workers.
    ///
    /// Waits at most `drain_timeout`; workers still busy after that are
    /// aborted. Workers waiting on the rate gate give up immediately.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let deadline = Instant::now() + self.config.drain_timeout;

        let run_loop = self.run_loop.lock().take();
        if let Some(mut handle) = run_loop {
            if timeout_at(deadline, &mut handle).await.is_err() {
                warn!("Poll loop did not stop in time");
                handle.abort();
            }
        }

        self.jobs.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        let mut aborted = 0;
        for mut handle in workers {
            if timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            warn!(aborted, "Accrual workers aborted after drain timeout");
        } else {
            info!("Accrual poller drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use loyalty_accrual::MockAccrualProvider;
    use loyalty_common::{luhn, OperationType, OrderStatus, Points, UserId};
    use loyalty_ledger::InMemoryLedger;
    use rust_decimal_macros::dec;

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        provider: Arc<MockAccrualProvider>,
        metrics: SharedMetrics,
        poller: Arc<AccrualPoller>,
        user: UserId,
    }

    fn config() -> PollerConfig {
        PollerConfig {
            workers: 10,
            interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(200),
            default_retry_after: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(2),
        }
    }

    async fn harness(config: PollerConfig) -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let provider = Arc::new(MockAccrualProvider::new());
        let metrics = Arc::new(Metrics::new());
        let user = ledger.register_user("alice", "h").await.unwrap();
        let poller = Arc::new(AccrualPoller::new(
            config,
            ledger.clone(),
            provider.clone(),
            metrics.clone(),
        ));
        Harness {
            ledger,
            provider,
            metrics,
            poller,
            user,
        }
    }

    fn numbers(count: usize) -> Vec<OrderNumber> {
        (0..count)
            .map(|i| {
                OrderNumber::from_trusted(luhn::complete(&format!("1000{i}")).unwrap())
            })
            .collect()
    }

    async fn upload(h: &Harness, numbers: &[OrderNumber]) {
        for number in numbers {
            h.ledger
                .insert_order(number, h.user, OperationType::Accrual)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_cycle_applies_successes_despite_failure() {
        let h = harness(config()).await;
        let orders = numbers(10);
        upload(&h, &orders).await;

        h.provider.set_reply(
            orders[0].as_str(),
            Err(AccrualError::UnexpectedStatus(500)),
        );
        for number in &orders[1..] {
            h.provider.set_reply(
                number.as_str(),
                Ok(AccrualReport::processed(number.as_str(), dec!(10))),
            );
        }

        h.poller.start_workers();
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.dispatched, 10);
        assert_eq!(report.processed, 9);
        assert_eq!(report.failed, 1);

        let balance = h.ledger.current_balance(h.user).await.unwrap();
        assert_eq!(balance.current, Points::new(dec!(90)));
        assert_eq!(
            h.ledger.list_pending_orders(10).await.unwrap(),
            vec![orders[0].clone()]
        );
        assert_eq!(h.metrics.snapshot().orders_processed, 9);
        h.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let h = harness(config()).await;
        let orders = numbers(4);
        upload(&h, &orders).await;

        h.provider.set_reply(
            orders[0].as_str(),
            Ok(AccrualReport::pending(orders[0].as_str(), AccrualStatus::Registered)),
        );
        h.provider.set_reply(
            orders[1].as_str(),
            Ok(AccrualReport::pending(orders[1].as_str(), AccrualStatus::Processing)),
        );
        h.provider
            .set_reply(orders[2].as_str(), Ok(AccrualReport::invalid(orders[2].as_str())));
        h.provider.set_reply(
            orders[3].as_str(),
            Ok(AccrualReport::pending(orders[3].as_str(), AccrualStatus::Processed)),
        );

        h.poller.start_workers();
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.invalidated, 1);
        assert_eq!(report.processed, 1);

        let status = |i: usize| {
            let ledger = h.ledger.clone();
            let number = orders[i].clone();
            async move { ledger.find_order(&number).await.unwrap().status }
        };
        assert_eq!(status(0).await, OrderStatus::Registered);
        assert_eq!(status(1).await, OrderStatus::Processing);
        assert_eq!(status(2).await, OrderStatus::Invalid);
        assert_eq!(status(3).await, OrderStatus::Processed);

        // Processed without an accrual credits nothing.
        let balance = h.ledger.current_balance(h.user).await.unwrap();
        assert_eq!(balance.current, Points::ZERO);

        // Repeating the cycle leaves the pending ones unchanged.
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.unchanged, 2);
        h.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_not_registered_and_negative_accrual_stay_pending() {
        let h = harness(config()).await;
        let orders = numbers(2);
        upload(&h, &orders).await;

        h.provider.set_reply(
            orders[1].as_str(),
            Ok(AccrualReport::processed(orders[1].as_str(), dec!(-5))),
        );

        h.poller.start_workers();
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(h.ledger.list_pending_orders(10).await.unwrap().len(), 2);
        h.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_reply_for_other_order_is_rejected() {
        let h = harness(config()).await;
        let orders = numbers(2);
        upload(&h, &orders).await;

        h.provider.set_reply(
            orders[0].as_str(),
            Ok(AccrualReport::processed(orders[1].as_str(), dec!(700))),
        );
        h.provider
            .set_reply(orders[1].as_str(), Ok(AccrualReport::invalid(orders[1].as_str())));

        h.poller.start_workers();
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.invalidated, 1);

        let mismatched = h.ledger.find_order(&orders[0]).await.unwrap();
        assert_eq!(mismatched.status, OrderStatus::New);
        assert_eq!(mismatched.amount, Points::ZERO);
        assert_eq!(
            h.ledger.find_order(&orders[1]).await.unwrap().status,
            OrderStatus::Invalid
        );
        assert_eq!(
            h.ledger.current_balance(h.user).await.unwrap().current,
            Points::ZERO
        );
        h.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_leaves_order_pending() {
        let mut cfg = config();
        cfg.request_timeout = Duration::from_millis(20);
        let h = harness(cfg).await;
        let orders = numbers(1);
        upload(&h, &orders).await;

        h.provider.set_reply(
            orders[0].as_str(),
            Ok(AccrualReport::processed(orders[0].as_str(), dec!(10))),
        );
        h.provider.set_delay(Some(Duration::from_millis(200)));

        h.poller.start_workers();
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(
            h.ledger.find_order(&orders[0]).await.unwrap().status,
            OrderStatus::New
        );
        h.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_rate_limit_suspends_calls() {
        let h = harness(config()).await;
        let orders = numbers(1);
        upload(&h, &orders).await;

        let backoff = Duration::from_millis(150);
        h.provider.push_reply(
            orders[0].as_str(),
            Err(AccrualError::RateLimited {
                retry_after: backoff,
            }),
        );
        h.provider.set_reply(
            orders[0].as_str(),
            Ok(AccrualReport::processed(orders[0].as_str(), dec!(500))),
        );

        h.poller.start_workers();
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.rate_limited, 1);
        assert!(!h.poller.gate().is_open());

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);

        let times = h.provider.call_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_millis(140));
        assert_eq!(h.metrics.snapshot().accrual_rate_limited, 1);
        h.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_abandons_gate_wait() {
        let h = harness(config()).await;
        let orders = numbers(3);
        upload(&h, &orders).await;

        h.poller.gate().suspend(Duration::from_secs(60));
        h.poller.start_workers();

        let poller = h.poller.clone();
        let cycle = tokio::spawn(async move { poller.run_cycle().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        h.poller.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.abandoned, 3);
        assert_eq!(h.provider.calls(), 0);
        assert!(!h.poller.is_running());
    }

    #[tokio::test]
    async fn test_run_loop_settles_and_drains() {
        let h = harness(config()).await;
        let orders = numbers(3);
        upload(&h, &orders).await;
        for number in &orders {
            h.provider.set_reply(
                number.as_str(),
                Ok(AccrualReport::processed(number.as_str(), dec!(1.5))),
            );
        }

        h.poller.start();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !h.ledger.list_pending_orders(10).await.unwrap().is_empty() {
            assert!(Instant::now() < deadline, "orders were not settled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.poller.shutdown().await;

        assert!(!h.poller.is_running());
        assert!(h.poller.run_cycle().await.is_err());
        let balance = h.ledger.current_balance(h.user).await.unwrap();
        assert_eq!(balance.current, Points::new(dec!(4.5)));
        // Each order settled exactly once.
        for number in &orders {
            assert_eq!(h.provider.calls_for(number.as_str()), 1);
        }
    }

    #[tokio::test]
    async fn test_cycle_requires_workers() {
        let h = harness(config()).await;
        assert!(matches!(
            h.poller.run_cycle().await,
            Err(LoyaltyError::Configuration(_))
        ));
    }
}
