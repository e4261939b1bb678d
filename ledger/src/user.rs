//! Registered users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loyalty_common::UserId;

/// A registered user as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Case-sensitive login.
    pub login: String,
    /// Credential hash produced by the auth layer. Opaque to the ledger.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// When the user registered.
    pub created_at: DateTime<Utc>,
}
