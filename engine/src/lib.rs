//! Loyalty Engine
//!
//! Accepts uploaded orders, reconciles them with the external accrual
//! authority in the background and lets users spend the points they earned.
//! Balances are projected from the ledger and never go negative.

pub mod admission;
pub mod config;
pub mod metrics;
pub mod poller;
pub mod service;
pub mod state;
pub mod withdrawal;

pub use admission::{OrderAdmission, SubmitOutcome};
pub use config::{DatabaseConfig, EngineConfig, PollerConfig};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use poller::{AccrualPoller, CycleReport, OrderOutcome};
pub use service::LoyaltyService;
pub use state::EngineState;
pub use withdrawal::{WithdrawOutcome, WithdrawalEngine};
