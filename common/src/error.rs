//! Error types for the loyalty ledger.

use std::fmt;

use thiserror::Error;

/// Failure modes of a call to the external accrual authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFailure {
    /// The authority asked us to slow down.
    RateLimited,
    /// The call exceeded its deadline.
    Timeout,
    /// Connection or protocol failure.
    Network,
    /// The authority answered with something we could not use.
    UnexpectedReply,
}

impl fmt::Display for ExternalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalFailure::RateLimited => "rate limited",
            ExternalFailure::Timeout => "timeout",
            ExternalFailure::Network => "network",
            ExternalFailure::UnexpectedReply => "unexpected reply",
        };
        f.write_str(name)
    }
}

/// Main error type for loyalty ledger operations.
#[derive(Error, Debug)]
pub enum LoyaltyError {
    /// Malformed input (order number failing Luhn, non-positive sum).
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Order owned by another user, or a lost duplicate-insert race.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No such ledger row or user.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Withdrawal larger than the available balance.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    /// Failure talking to the accrual authority. Never surfaced to end users;
    /// the affected order is retried on the next poll cycle.
    #[error("Accrual authority {kind}: {message}")]
    TransientExternal {
        kind: ExternalFailure,
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// Unexpected store failure; the enclosing transaction was rolled back.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LoyaltyError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoyaltyError::TransientExternal { .. })
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LoyaltyError::TransientExternal {
                retry_after_ms: Some(ms),
                ..
            } => Some(*ms),
            LoyaltyError::TransientExternal {
                kind: ExternalFailure::Network | ExternalFailure::Timeout,
                ..
            } => Some(1000),
            _ => None,
        }
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            LoyaltyError::Validation { .. } => "VALIDATION_ERROR",
            LoyaltyError::Conflict(_) => "CONFLICT",
            LoyaltyError::NotFound(_) => "NOT_FOUND",
            LoyaltyError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LoyaltyError::TransientExternal { .. } => "TRANSIENT_EXTERNAL",
            LoyaltyError::Persistence(_) => "PERSISTENCE_ERROR",
            LoyaltyError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for loyalty ledger operations.
pub type Result<T> = std::result::Result<T, LoyaltyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_external_failures_retry() {
        let rate_limited = LoyaltyError::TransientExternal {
            kind: ExternalFailure::RateLimited,
            message: "429".to_string(),
            retry_after_ms: Some(60_000),
        };
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after_ms(), Some(60_000));

        let network = LoyaltyError::TransientExternal {
            kind: ExternalFailure::Network,
            message: "connection reset".to_string(),
            retry_after_ms: None,
        };
        assert_eq!(network.retry_after_ms(), Some(1000));

        let conflict = LoyaltyError::Conflict("order 79927398713".to_string());
        assert!(!conflict.is_retryable());
        assert_eq!(conflict.retry_after_ms(), None);
        assert_eq!(conflict.error_code(), "CONFLICT");
    }
}
