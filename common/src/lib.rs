//! Loyalty Ledger Common Types
//!
//! Shared types used across the loyalty accrual ledger: identifiers with
//! Luhn-validated order numbers, point amounts, order lifecycle enums and
//! the error taxonomy.

pub mod identifiers;
pub mod luhn;
pub mod points;
pub mod order;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use points::*;
pub use order::*;
pub use error::*;
pub use time::*;
