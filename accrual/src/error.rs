//! Accrual client error types.

use std::time::Duration;

use loyalty_common::{ExternalFailure, LoyaltyError};
use thiserror::Error;

/// Errors from a single call to the accrual authority.
///
/// None of these are fatal: the poller logs them and leaves the order
/// pending for the next cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccrualError {
    /// The authority replied `429 Too Many Requests`.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The authority does not know the order yet (`204 No Content`).
    #[error("Order {0} is not registered with the accrual authority")]
    NotRegistered(String),

    /// The call did not complete within its deadline.
    #[error("Accrual request timed out")]
    Timeout,

    /// Connection or transport failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Any status code other than 200, 204 or 429.
    #[error("Unexpected status {0}")]
    UnexpectedStatus(u16),

    /// The body did not decode as an accrual report.
    #[error("Malformed reply: {0}")]
    Decode(String),

    /// The client could not be constructed.
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl AccrualError {
    /// The suspension interval requested by the authority, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AccrualError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type for accrual calls.
pub type AccrualResult<T> = Result<T, AccrualError>;

impl From<AccrualError> for LoyaltyError {
    fn from(err: AccrualError) -> Self {
        let (kind, retry_after_ms) = match &err {
            AccrualError::RateLimited { retry_after } => (
                ExternalFailure::RateLimited,
                Some(retry_after.as_millis() as u64),
            ),
            AccrualError::Timeout => (ExternalFailure::Timeout, None),
            AccrualError::Network(_) => (ExternalFailure::Network, None),
            AccrualError::Config(msg) => return LoyaltyError::Configuration(msg.clone()),
            AccrualError::NotRegistered(_)
            | AccrualError::UnexpectedStatus(_)
            | AccrualError::Decode(_) => (ExternalFailure::UnexpectedReply, None),
        };

        LoyaltyError::TransientExternal {
            kind,
            message: err.to_string(),
            retry_after_ms,
        }
    }
}
