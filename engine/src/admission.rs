//! Order admission: accept uploaded order numbers into the ledger.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use loyalty_common::{LoyaltyError, OperationType, OrderNumber, Result, UserId};
use loyalty_ledger::{LedgerEntry, LedgerError, LedgerStore};

/// Result of submitting an order number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome {
    /// New order recorded in status `NEW`.
    Accepted,
    /// The caller uploaded this number before.
    AlreadyOwnedByUser,
    /// Another user uploaded this number.
    OwnedByOther,
    /// The number failed validation.
    Invalid,
}

impl SubmitOutcome {
    /// HTTP status code for the outcome.
    pub fn http_status(&self) -> u16 {
        match self {
            SubmitOutcome::Accepted => 202,
            SubmitOutcome::AlreadyOwnedByUser => 200,
            SubmitOutcome::OwnedByOther => 409,
            SubmitOutcome::Invalid => 422,
        }
    }
}

/// Admits orders for accrual.
pub struct OrderAdmission {
    store: Arc<dyn LedgerStore>,
}

impl OrderAdmission {
    /// Create a new admission handler.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Submit `raw` on behalf of `user_id`.
    ///
    /// Only store failures are returned as errors.
    #[instrument(skip(self))]
    pub async fn submit(&self, user_id: UserId, raw: &str) -> Result<SubmitOutcome> {
        let number = match OrderNumber::parse(raw) {
            Ok(number) => number,
            Err(e) => {
                debug!(error = %e, "Order number rejected");
                return Ok(SubmitOutcome::Invalid);
            }
        };

        match self.store.find_order(&number).await {
            Ok(existing) => return Ok(ownership(&existing, user_id)),
            Err(LedgerError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match self
            .store
            .insert_order(&number, user_id, OperationType::Accrual)
            .await
        {
            Ok(_) => {
                info!(number = %number, "Order accepted");
                Ok(SubmitOutcome::Accepted)
            }
            Err(LedgerError::DuplicateNumber(_)) => {
                // Lost a race with a concurrent insert of the same number.
                let existing = self
                    .store
                    .find_order(&number)
                    .await
                    .map_err(LoyaltyError::from)?;
                Ok(ownership(&existing, user_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ownership(existing: &LedgerEntry, user_id: UserId) -> SubmitOutcome {
    if existing.user_id == user_id {
        SubmitOutcome::AlreadyOwnedByUser
    } else {
        SubmitOutcome::OwnedByOther
    }
}
