//! Withdrawal engine: spend points against an order number.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use loyalty_common::{OrderNumber, Points, Result, UserId};
use loyalty_ledger::{LedgerEntry, LedgerError, LedgerStore};

/// Result of a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// The withdrawal was recorded.
    Ok(LedgerEntry),
    /// The balance does not cover the sum; nothing was recorded.
    InsufficientFunds,
    /// Bad order number or non-positive sum.
    Invalid,
    /// The number was already used for a withdrawal.
    NumberAlreadyUsed,
}

impl WithdrawOutcome {
    /// HTTP status code for the outcome.
    pub fn http_status(&self) -> u16 {
        match self {
            WithdrawOutcome::Ok(_) => 200,
            WithdrawOutcome::InsufficientFunds => 402,
            WithdrawOutcome::Invalid => 422,
            WithdrawOutcome::NumberAlreadyUsed => 409,
        }
    }

    /// Check if the withdrawal was recorded.
    pub fn is_ok(&self) -> bool {
        matches!(self, WithdrawOutcome::Ok(_))
    }
}

/// Records withdrawals against projected balances.
pub struct WithdrawalEngine {
    store: Arc<dyn LedgerStore>,
}

impl WithdrawalEngine {
    /// Create a new withdrawal engine.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Withdraw `sum` points from `user_id` against the order number `raw`.
    ///
    /// The balance check and the insert happen in one store transaction.
    #[instrument(skip(self), fields(sum = %sum))]
    pub async fn withdraw(&self, user_id: UserId, raw: &str, sum: Points) -> Result<WithdrawOutcome> {
        let number = match OrderNumber::parse(raw) {
            Ok(number) => number,
            Err(e) => {
                debug!(error = %e, "Withdrawal number rejected");
                return Ok(WithdrawOutcome::Invalid);
            }
        };
        if !sum.is_positive() {
            debug!("Withdrawal sum must be positive");
            return Ok(WithdrawOutcome::Invalid);
        }

        match self.store.record_withdrawal(user_id, &number, sum).await {
            Ok(entry) => {
                info!(number = %number, "Withdrawal recorded");
                Ok(WithdrawOutcome::Ok(entry))
            }
            Err(LedgerError::InsufficientFunds { available, .. }) => {
                warn!(available = %available, "Insufficient funds");
                Ok(WithdrawOutcome::InsufficientFunds)
            }
            Err(LedgerError::DuplicateNumber(_)) => Ok(WithdrawOutcome::NumberAlreadyUsed),
            Err(e) => Err(e.into()),
        }
    }
}
