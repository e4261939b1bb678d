//! Simulation controller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use loyalty_common::{luhn, OrderNumber, Points, UserId};
use loyalty_engine::{EngineConfig, LoyaltyService, PollerConfig, SubmitOutcome};
use loyalty_ledger::{BalanceProjector, InMemoryLedger, LedgerStore};

use crate::authority::SimulatedAuthority;
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// Controls the simulation.
pub struct SimulationController {
    /// Number of users created for continuous mode.
    user_count: usize,
    /// Simulation speed multiplier.
    speed: f64,
    /// Random number generator.
    rng: Arc<RwLock<StdRng>>,
    /// Ledger backing the engine.
    ledger: Arc<InMemoryLedger>,
    /// Scripted accrual authority.
    authority: Arc<SimulatedAuthority>,
    /// Engine under test.
    service: Arc<LoyaltyService>,
    /// Registered users by login.
    users: Arc<RwLock<HashMap<String, UserId>>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Running flag.
    running: Arc<RwLock<bool>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(user_count: usize, speed: f64, seed: Option<u64>, rate_limit_prob: f64) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let authority_rng = StdRng::seed_from_u64(rng.gen());
        let speed = if speed > 0.0 { speed } else { 1.0 };

        let ledger = Arc::new(InMemoryLedger::new());
        let authority =
            Arc::new(SimulatedAuthority::new(authority_rng).with_rate_limit_prob(rate_limit_prob));
        let service = Arc::new(LoyaltyService::new(
            Self::engine_config(speed),
            ledger.clone(),
            authority.clone(),
        ));

        Self {
            user_count,
            speed,
            rng: Arc::new(RwLock::new(rng)),
            ledger,
            authority,
            service,
            users: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    fn engine_config(speed: f64) -> EngineConfig {
        EngineConfig {
            accrual_address: "sim://authority".to_string(),
            poller: PollerConfig {
                workers: 4,
                interval: Duration::from_millis((500.0 / speed) as u64),
                request_timeout: Duration::from_secs(2),
                default_retry_after: Duration::from_secs(1),
                drain_timeout: Duration::from_secs(5),
            },
            ..EngineConfig::default()
        }
    }

    /// Register the users used by continuous mode.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        info!("Initializing simulation with {} users", self.user_count);

        for i in 0..self.user_count {
            self.register(&format!("user-{i}")).await?;
        }
        Ok(())
    }

    async fn register(&self, login: &str) -> anyhow::Result<UserId> {
        let id = self
            .service
            .register_user(login, &format!("sim-hash-{login}"))
            .await?;
        self.users.write().await.insert(login.to_string(), id);
        debug!(login, user_id = %id, "Registered user");
        Ok(id)
    }

    async fn user(&self, login: &str) -> anyhow::Result<UserId> {
        self.users
            .read()
            .await
            .get(login)
            .copied()
            .ok_or_else(|| anyhow!("Unknown user: {}", login))
    }

    /// Run a scenario step by step, failing on the first broken expectation.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        *self.running.write().await = true;

        let mut result = Ok(());
        for (idx, step) in scenario.steps.iter().enumerate() {
            if !*self.running.read().await {
                break;
            }

            if let Err(e) = self.execute_step(step).await {
                result = Err(e.context(format!("step {} ({:?})", idx + 1, step)));
                break;
            }
        }

        *self.running.write().await = false;
        self.service.stop().await?;

        result?;
        self.verify_invariants().await
    }

    /// Run in continuous mode with random traffic.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        self.service.start().await?;
        *self.running.write().await = true;

        let start = Instant::now();
        let users: Vec<UserId> = self.users.read().await.values().copied().collect();
        if users.is_empty() {
            bail!("continuous mode needs at least one user");
        }

        let service = self.service.clone();
        let metrics = self.metrics.clone();
        let rng = self.rng.clone();
        let running = self.running.clone();
        let speed = self.speed;

        let handle = tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }

                let (user, number, withdraw_sum) = {
                    let mut rng_guard = rng.write().await;
                    let user = users[rng_guard.gen_range(0..users.len())];
                    let number = random_order_number(&mut *rng_guard);
                    let withdraw_sum = if rng_guard.gen_bool(0.3) {
                        Some(Decimal::new(rng_guard.gen_range(1..50_000), 2))
                    } else {
                        None
                    };
                    (user, number, withdraw_sum)
                };

                let started = Instant::now();
                let accepted = match withdraw_sum {
                    Some(sum) => service
                        .withdraw(user, &number, Points::new(sum))
                        .await
                        .map(|outcome| outcome.is_ok()),
                    None => service
                        .submit(user, &number)
                        .await
                        .map(|outcome| outcome == SubmitOutcome::Accepted),
                };
                let latency = started.elapsed().as_millis() as u64;

                match accepted {
                    Ok(true) => metrics.write().await.record_success(latency),
                    Ok(false) => metrics.write().await.record_rejection(latency),
                    Err(e) => {
                        warn!(error = %e, "Simulated request failed");
                        metrics.write().await.record_rejection(latency);
                    }
                }

                // Wait based on speed
                let delay = Duration::from_millis((100.0 / speed) as u64);
                tokio::time::sleep(delay).await;
            }
        });

        // Wait for duration or Ctrl+C
        match duration {
            Some(d) => {
                tokio::time::sleep(d).await;
            }
            None => {
                tokio::signal::ctrl_c().await?;
            }
        }

        *self.running.write().await = false;
        handle.await?;
        self.service.stop().await?;

        self.metrics.write().await.elapsed_secs = start.elapsed().as_secs();
        info!(
            authority_calls = self.authority.calls(),
            "Continuous run finished"
        );
        self.verify_invariants().await
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::RegisterUser { login } => {
                self.register(login).await?;
            }
            ScenarioStep::SubmitOrder {
                login,
                number,
                expect,
            } => {
                let user = self.user(login).await?;
                let started = Instant::now();
                let outcome = self.service.submit(user, number).await?;
                self.record(outcome == SubmitOutcome::Accepted, started).await;

                info!("{} submitted {}: {:?}", login, number, outcome);
                if let Some(expected) = expect {
                    ensure!(
                        outcome == *expected,
                        "submit {} expected {:?}, got {:?}",
                        number,
                        expected,
                        outcome
                    );
                }
            }
            ScenarioStep::ScriptAccrual {
                number,
                fate,
                pending_replies,
            } => {
                info!("Scripting {} as {:?} after {} pending replies", number, fate, pending_replies);
                self.authority.script(number, fate.clone(), *pending_replies);
            }
            ScenarioStep::Withdraw {
                login,
                number,
                sum,
                expect_status,
            } => {
                let user = self.user(login).await?;
                let started = Instant::now();
                let outcome = self
                    .service
                    .withdraw(user, number, Points::new(*sum))
                    .await?;
                self.record(outcome.is_ok(), started).await;

                let status = outcome.http_status();
                info!("{} withdrew {} against {}: {}", login, sum, number, status);
                if let Some(expected) = expect_status {
                    ensure!(
                        status == *expected,
                        "withdraw {} against {} expected {}, got {}",
                        sum,
                        number,
                        expected,
                        status
                    );
                }
            }
            ScenarioStep::PollCycles { count } => {
                for _ in 0..*count {
                    let report = self.service.poll_once().await?;
                    info!(
                        dispatched = report.dispatched,
                        processed = report.processed,
                        failed = report.failed,
                        rate_limited = report.rate_limited,
                        "Poll cycle"
                    );
                }
            }
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.speed) as u64;
                info!("Waiting {}ms (adjusted: {}ms)", millis, adjusted);
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::InjectFault { fault } => {
                info!("Injecting fault {:?}", fault);
                self.authority.inject(fault.clone());
            }
            ScenarioStep::ClearFaults => {
                info!("Clearing faults");
                self.authority.clear_faults();
            }
            ScenarioStep::Assert { condition } => {
                self.check(condition).await?;
                self.metrics.write().await.record_assertion();
            }
        }

        Ok(())
    }

    async fn record(&self, accepted: bool, started: Instant) {
        let latency = started.elapsed().as_millis() as u64;
        let mut metrics = self.metrics.write().await;
        if accepted {
            metrics.record_success(latency);
        } else {
            metrics.record_rejection(latency);
        }
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        info!("Asserting condition: {:?}", condition);
        match condition {
            AssertCondition::BalanceEquals {
                login,
                current,
                withdrawn,
            } => {
                let balance = self.service.balance(self.user(login).await?).await?;
                ensure!(
                    balance.current == Points::new(*current)
                        && balance.withdrawn == Points::new(*withdrawn),
                    "balance of {} is {}/{}, expected {}/{}",
                    login,
                    balance.current,
                    balance.withdrawn,
                    current,
                    withdrawn
                );
            }
            AssertCondition::OrderStatus { number, status } => {
                let entry = self
                    .ledger
                    .find_order(&OrderNumber::from_trusted(number.as_str()))
                    .await?;
                ensure!(
                    entry.status == *status,
                    "order {} is {}, expected {}",
                    number,
                    entry.status,
                    status
                );
            }
            AssertCondition::WithdrawalCount { login, count } => {
                let withdrawals = self
                    .service
                    .list_withdrawals(self.user(login).await?)
                    .await?;
                ensure!(
                    withdrawals.len() == *count,
                    "{} has {} withdrawals, expected {}",
                    login,
                    withdrawals.len(),
                    count
                );
            }
        }
        Ok(())
    }

    /// Check the ledger against the balances the engine reports.
    ///
    /// Every user's balance must equal the projection of their entries and
    /// must not be negative; no `(number, operation)` pair may repeat.
    pub async fn verify_invariants(&self) -> anyhow::Result<()> {
        let entries = self.ledger.snapshot();

        let mut seen = HashSet::new();
        for entry in &entries {
            ensure!(
                seen.insert((entry.number.clone(), entry.operation)),
                "duplicate ledger entry for {} ({})",
                entry.number,
                entry.operation
            );
        }

        for user in self.ledger.users() {
            let projected =
                BalanceProjector::project(entries.iter().filter(|e| e.user_id == user.id));
            let reported = self.service.balance(user.id).await?;
            ensure!(
                reported == projected,
                "balance of {} is {:?}, ledger projects {:?}",
                user.login,
                reported,
                projected
            );
            ensure!(
                !reported.current.is_negative(),
                "balance of {} is negative: {}",
                user.login,
                reported.current
            );
        }

        info!(entries = entries.len(), "Ledger invariants hold");
        Ok(())
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

/// A random Luhn-valid order number of 10 to 16 digits.
fn random_order_number(rng: &mut impl Rng) -> String {
    let len = rng.gen_range(9..16);
    let mut payload = String::with_capacity(len);
    payload.push(char::from(b'1' + rng.gen_range(0..9u8)));
    for _ in 1..len {
        payload.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    // The payload is all digits, so completion always succeeds.
    luhn::complete(&payload).unwrap_or(payload)
}
