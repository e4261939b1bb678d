//! Loyalty Ledger Store
//!
//! Durable record of users, accrual orders and withdrawals. Enforces order
//! number uniqueness and derives balances from committed entries inside the
//! transaction that changes them.

pub mod balance;
pub mod entry;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod postgres;
pub mod store;
pub mod user;

pub use balance::{Balance, BalanceProjector};
pub use entry::{LedgerEntry, Transition};
pub use error::{LedgerError, LedgerResult};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryLedger;
pub use postgres::{connect, migrate, PostgresLedger};
pub use store::LedgerStore;
pub use user::User;
