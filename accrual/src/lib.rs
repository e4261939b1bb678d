//! Loyalty Accrual Client
//!
//! Queries the external accrual authority about uploaded orders.
//!
//! # Features
//!
//! - `AccrualProvider` trait with an HTTP implementation
//! - Reply interpretation for `200`, `204` and `429` answers
//! - A shared `RateGate` that suspends all calls after a rate-limit reply
//!
//! # Example
//!
//! ```rust,ignore
//! use loyalty_accrual::{AccrualProvider, HttpAccrualClient};
//!
//! let client = HttpAccrualClient::new("http://localhost:8080", Duration::from_secs(5))?;
//! let report = client.fetch(&number).await?;
//! ```

pub mod client;
pub mod error;
pub mod provider;
pub mod report;
pub mod throttle;

pub use client::{interpret, HttpAccrualClient};
pub use error::{AccrualError, AccrualResult};
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockAccrualProvider;
pub use provider::AccrualProvider;
pub use report::{AccrualReport, AccrualStatus};
pub use throttle::RateGate;
