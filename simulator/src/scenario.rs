//! Simulation scenarios.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use loyalty_common::OrderStatus;
use loyalty_engine::SubmitOutcome;

use crate::authority::{AccrualFate, FaultType};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Register a user.
    RegisterUser { login: String },
    /// Upload an order number on behalf of a user.
    SubmitOrder {
        login: String,
        number: String,
        #[serde(default)]
        expect: Option<SubmitOutcome>,
    },
    /// Decide how the authority will settle an order.
    ScriptAccrual {
        number: String,
        fate: AccrualFate,
        #[serde(default)]
        pending_replies: u32,
    },
    /// Withdraw points against an order number.
    Withdraw {
        login: String,
        number: String,
        sum: Decimal,
        /// Expected HTTP status of the outcome.
        #[serde(default)]
        expect_status: Option<u16>,
    },
    /// Run reconciliation cycles.
    PollCycles { count: u32 },
    /// Sleep.
    Wait { millis: u64 },
    /// Inject a fault into the authority.
    InjectFault { fault: FaultType },
    /// Clear all authority faults.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// The user's projected balance.
    BalanceEquals {
        login: String,
        current: Decimal,
        withdrawn: Decimal,
    },
    /// Ledger status of an accrual order.
    OrderStatus { number: String, status: OrderStatus },
    /// Number of withdrawals recorded for a user.
    WithdrawalCount { login: String, count: usize },
}

impl Scenario {
    /// Built-in scenario names.
    pub const BUILT_IN: [&'static str; 5] = [
        "accrue-and-withdraw",
        "contested-order",
        "rate-limit",
        "authority-outage",
        "overdraw",
    ];

    /// Load a built-in scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "accrue-and-withdraw" => Ok(Self::accrue_and_withdraw()),
            "contested-order" => Ok(Self::contested_order()),
            "rate-limit" => Ok(Self::rate_limit()),
            "authority-outage" => Ok(Self::authority_outage()),
            "overdraw" => Ok(Self::overdraw()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (built-in: {})",
                name,
                Self::BUILT_IN.join(", ")
            )),
        }
    }

    /// Load a scenario from a JSON file.
    pub fn load_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Accrue points on one order, then spend part of them.
    fn accrue_and_withdraw() -> Self {
        Self {
            name: "accrue-and-withdraw".to_string(),
            description: "Order processed after two pending replies, then a withdrawal".to_string(),
            steps: vec![
                register("alice"),
                submit("alice", "12345678903", SubmitOutcome::Accepted),
                ScenarioStep::ScriptAccrual {
                    number: "12345678903".to_string(),
                    fate: AccrualFate::Processed {
                        accrual: Decimal::from(500),
                    },
                    pending_replies: 2,
                },
                ScenarioStep::PollCycles { count: 1 },
                assert_status("12345678903", OrderStatus::Registered),
                ScenarioStep::PollCycles { count: 2 },
                assert_status("12345678903", OrderStatus::Processed),
                assert_balance("alice", 500, 0),
                withdraw("alice", "346436439", 200, 200),
                assert_balance("alice", 300, 200),
                ScenarioStep::Assert {
                    condition: AssertCondition::WithdrawalCount {
                        login: "alice".to_string(),
                        count: 1,
                    },
                },
            ],
        }
    }

    /// Two users race for the same order number.
    fn contested_order() -> Self {
        Self {
            name: "contested-order".to_string(),
            description: "Second uploader of a number is refused; the owner keeps it".to_string(),
            steps: vec![
                register("alice"),
                register("bob"),
                submit("alice", "79927398713", SubmitOutcome::Accepted),
                submit("bob", "79927398713", SubmitOutcome::OwnedByOther),
                submit("alice", "79927398713", SubmitOutcome::AlreadyOwnedByUser),
                submit("bob", "79927398714", SubmitOutcome::Invalid),
                ScenarioStep::ScriptAccrual {
                    number: "79927398713".to_string(),
                    fate: AccrualFate::Invalid,
                    pending_replies: 0,
                },
                ScenarioStep::PollCycles { count: 1 },
                assert_status("79927398713", OrderStatus::Invalid),
                assert_balance("alice", 0, 0),
                assert_balance("bob", 0, 0),
            ],
        }
    }

    /// The authority throttles the poller for a short while.
    fn rate_limit() -> Self {
        Self {
            name: "rate-limit".to_string(),
            description: "A 429 leaves the order pending until the suspension ends".to_string(),
            steps: vec![
                register("alice"),
                submit("alice", "12345678903", SubmitOutcome::Accepted),
                ScenarioStep::ScriptAccrual {
                    number: "12345678903".to_string(),
                    fate: AccrualFate::Processed {
                        accrual: Decimal::from(100),
                    },
                    pending_replies: 0,
                },
                ScenarioStep::InjectFault {
                    fault: FaultType::RateLimit {
                        retry_after_ms: 300,
                    },
                },
                ScenarioStep::PollCycles { count: 1 },
                assert_status("12345678903", OrderStatus::New),
                assert_balance("alice", 0, 0),
                ScenarioStep::ClearFaults,
                ScenarioStep::PollCycles { count: 1 },
                assert_status("12345678903", OrderStatus::Processed),
                assert_balance("alice", 100, 0),
            ],
        }
    }

    /// The authority is unreachable, then recovers.
    fn authority_outage() -> Self {
        Self {
            name: "authority-outage".to_string(),
            description: "Transport failures keep orders pending without losing them".to_string(),
            steps: vec![
                register("alice"),
                submit("alice", "4561261212345467", SubmitOutcome::Accepted),
                ScenarioStep::ScriptAccrual {
                    number: "4561261212345467".to_string(),
                    fate: AccrualFate::Processed {
                        accrual: Decimal::new(25050, 2),
                    },
                    pending_replies: 1,
                },
                ScenarioStep::InjectFault {
                    fault: FaultType::Outage,
                },
                ScenarioStep::PollCycles { count: 2 },
                assert_status("4561261212345467", OrderStatus::New),
                ScenarioStep::ClearFaults,
                ScenarioStep::PollCycles { count: 1 },
                assert_status("4561261212345467", OrderStatus::Processing),
                ScenarioStep::PollCycles { count: 1 },
                assert_status("4561261212345467", OrderStatus::Processed),
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        login: "alice".to_string(),
                        current: Decimal::new(25050, 2),
                        withdrawn: Decimal::ZERO,
                    },
                },
            ],
        }
    }

    /// Withdrawals that would overdraw, reuse a number or carry a bad one.
    fn overdraw() -> Self {
        Self {
            name: "overdraw".to_string(),
            description: "Refused withdrawals never move the balance".to_string(),
            steps: vec![
                register("alice"),
                submit("alice", "12345678903", SubmitOutcome::Accepted),
                ScenarioStep::ScriptAccrual {
                    number: "12345678903".to_string(),
                    fate: AccrualFate::Processed {
                        accrual: Decimal::from(100),
                    },
                    pending_replies: 0,
                },
                ScenarioStep::PollCycles { count: 1 },
                withdraw("alice", "346436439", 60, 200),
                withdraw("alice", "4561261212345467", 60, 402),
                withdraw("alice", "346436439", 10, 409),
                withdraw("alice", "346436438", 10, 422),
                withdraw("alice", "79927398713", 0, 422),
                assert_balance("alice", 40, 60),
                ScenarioStep::Assert {
                    condition: AssertCondition::WithdrawalCount {
                        login: "alice".to_string(),
                        count: 1,
                    },
                },
            ],
        }
    }
}

fn register(login: &str) -> ScenarioStep {
    ScenarioStep::RegisterUser {
        login: login.to_string(),
    }
}

fn submit(login: &str, number: &str, expect: SubmitOutcome) -> ScenarioStep {
    ScenarioStep::SubmitOrder {
        login: login.to_string(),
        number: number.to_string(),
        expect: Some(expect),
    }
}

fn withdraw(login: &str, number: &str, sum: i64, expect_status: u16) -> ScenarioStep {
    ScenarioStep::Withdraw {
        login: login.to_string(),
        number: number.to_string(),
        sum: Decimal::from(sum),
        expect_status: Some(expect_status),
    }
}

fn assert_status(number: &str, status: OrderStatus) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::OrderStatus {
            number: number.to_string(),
            status,
        },
    }
}

fn assert_balance(login: &str, current: i64, withdrawn: i64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            login: login.to_string(),
            current: Decimal::from(current),
            withdrawn: Decimal::from(withdrawn),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_in_scenarios_load() {
        for name in Scenario::BUILT_IN {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("no-such-scenario").is_err());
    }

    #[test]
    fn test_scenario_from_json() {
        let raw = r#"{
            "name": "custom",
            "description": "hand written",
            "steps": [
                {"RegisterUser": {"login": "carol"}},
                {"SubmitOrder": {"login": "carol", "number": "12345678903", "expect": "Accepted"}},
                {"ScriptAccrual": {"number": "12345678903", "fate": {"Processed": {"accrual": "42.5"}}}},
                {"PollCycles": {"count": 1}},
                {"Withdraw": {"login": "carol", "number": "346436439", "sum": "2.5"}},
                "ClearFaults",
                {"Assert": {"condition": {"OrderStatus": {"number": "12345678903", "status": "PROCESSED"}}}}
            ]
        }"#;

        let scenario: Scenario = serde_json::from_str(raw).unwrap();
        assert_eq!(scenario.steps.len(), 7);
        match &scenario.steps[2] {
            ScenarioStep::ScriptAccrual {
                fate,
                pending_replies,
                ..
            } => {
                assert_eq!(
                    fate,
                    &AccrualFate::Processed {
                        accrual: Decimal::new(425, 1)
                    }
                );
                assert_eq!(*pending_replies, 0);
            }
            other => panic!("unexpected step {other:?}"),
        }
        match &scenario.steps[4] {
            ScenarioStep::Withdraw { expect_status, .. } => assert!(expect_status.is_none()),
            other => panic!("unexpected step {other:?}"),
        }
    }
}
