//! Simulated accrual authority.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use loyalty_accrual::{AccrualError, AccrualProvider, AccrualReport, AccrualResult, AccrualStatus};
use loyalty_common::OrderNumber;

/// How an order will eventually be settled by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccrualFate {
    /// Processed with this award.
    Processed { accrual: Decimal },
    /// Refused.
    Invalid,
    /// Never registered; every query answers `204`.
    Unregistered,
}

/// Faults the authority can be told to exhibit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    /// Answer `429` with this `Retry-After`.
    RateLimit { retry_after_ms: u64 },
    /// Fail every call at the transport level.
    Outage,
    /// Delay every reply.
    Latency { delay_ms: u64 },
}

#[derive(Debug, Clone)]
struct OrderScript {
    fate: AccrualFate,
    /// Queries answered with a pending status before the fate is revealed.
    pending_replies: u32,
}

/// An in-process accrual authority with scripted or random outcomes.
pub struct SimulatedAuthority {
    scripts: DashMap<String, OrderScript>,
    faults: RwLock<Vec<FaultType>>,
    rng: Mutex<StdRng>,
    /// Chance that an unscripted order ends up processed.
    processed_ratio: f64,
    /// Chance that any call is answered with a short rate limit.
    rate_limit_prob: f64,
    calls: AtomicU64,
}

impl SimulatedAuthority {
    /// Create an authority drawing random outcomes from `rng`.
    pub fn new(rng: StdRng) -> Self {
        Self {
            scripts: DashMap::new(),
            faults: RwLock::new(Vec::new()),
            rng: Mutex::new(rng),
            processed_ratio: 0.8,
            rate_limit_prob: 0.0,
            calls: AtomicU64::new(0),
        }
    }

    /// Set the chance that a call is randomly rate-limited.
    pub fn with_rate_limit_prob(mut self, prob: f64) -> Self {
        self.rate_limit_prob = prob.clamp(0.0, 1.0);
        self
    }

    /// Fix the outcome of one order.
    pub fn script(&self, number: &str, fate: AccrualFate, pending_replies: u32) {
        self.scripts.insert(
            number.to_string(),
            OrderScript {
                fate,
                pending_replies,
            },
        );
    }

    /// Start exhibiting a fault.
    pub fn inject(&self, fault: FaultType) {
        self.faults.write().push(fault);
    }

    /// Stop exhibiting all faults.
    pub fn clear_faults(&self) {
        self.faults.write().clear();
    }

    /// Number of calls answered.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn random_script(&self) -> OrderScript {
        let mut rng = self.rng.lock();
        let fate = if rng.gen_bool(self.processed_ratio) {
            let cents: i64 = rng.gen_range(0..100_000);
            AccrualFate::Processed {
                accrual: Decimal::new(cents, 2),
            }
        } else {
            AccrualFate::Invalid
        };
        OrderScript {
            fate,
            pending_replies: rng.gen_range(0..3),
        }
    }

    fn random_rate_limit(&self) -> bool {
        self.rate_limit_prob > 0.0 && self.rng.lock().gen_bool(self.rate_limit_prob)
    }

    fn next_reply(&self, number: &OrderNumber) -> AccrualResult<AccrualReport> {
        let mut script = self
            .scripts
            .entry(number.to_string())
            .or_insert_with(|| self.random_script());

        if script.fate == AccrualFate::Unregistered {
            return Err(AccrualError::NotRegistered(number.to_string()));
        }

        if script.pending_replies > 0 {
            script.pending_replies -= 1;
            let status = if script.pending_replies % 2 == 0 {
                AccrualStatus::Processing
            } else {
                AccrualStatus::Registered
            };
            return Ok(AccrualReport::pending(number.as_str(), status));
        }

        Ok(match &script.fate {
            AccrualFate::Processed { accrual } => AccrualReport::processed(number.as_str(), *accrual),
            _ => AccrualReport::invalid(number.as_str()),
        })
    }
}

#[async_trait]
impl AccrualProvider for SimulatedAuthority {
    fn name(&self) -> &str {
        "SIMULATED"
    }

    async fn fetch(&self, number: &OrderNumber) -> AccrualResult<AccrualReport> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let faults = self.faults.read().clone();

        for fault in &faults {
            if let FaultType::Latency { delay_ms } = fault {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }
        }
        for fault in &faults {
            match fault {
                FaultType::RateLimit { retry_after_ms } => {
                    return Err(AccrualError::RateLimited {
                        retry_after: Duration::from_millis(*retry_after_ms),
                    })
                }
                FaultType::Outage => {
                    return Err(AccrualError::Network("authority unavailable".to_string()))
                }
                FaultType::Latency { .. } => {}
            }
        }

        if self.random_rate_limit() {
            return Err(AccrualError::RateLimited {
                retry_after: Duration::from_secs(1),
            });
        }

        self.next_reply(number)
    }
}
