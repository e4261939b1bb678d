//! Ledger store error types.

use loyalty_common::{LoyaltyError, OrderNumber, Points};
use thiserror::Error;

/// Errors that can occur in the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No matching row.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An entry with this number already exists in the same operation domain.
    #[error("Duplicate order number: {0}")]
    DuplicateNumber(OrderNumber),

    /// Login already taken.
    #[error("Duplicate login: {0}")]
    DuplicateLogin(String),

    /// Withdrawal exceeds the projected balance.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Points, available: Points },

    /// A stored value could not be decoded.
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<LedgerError> for LoyaltyError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => LoyaltyError::NotFound(what),
            LedgerError::DuplicateNumber(number) => {
                LoyaltyError::Conflict(format!("order {number} already exists"))
            }
            LedgerError::DuplicateLogin(login) => {
                LoyaltyError::Conflict(format!("login {login:?} already taken"))
            }
            LedgerError::InsufficientFunds {
                required,
                available,
            } => LoyaltyError::InsufficientFunds {
                required: required.to_string(),
                available: available.to_string(),
            },
            other => LoyaltyError::Persistence(other.to_string()),
        }
    }
}

/// Postgres `unique_violation`.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
