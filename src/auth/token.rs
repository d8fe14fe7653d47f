use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Durable token pair for one realm.
///
/// A record is only ever persisted whole: an access token without a refresh
/// token (or the reverse) is rejected by [`TokenRecord::validate`].
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use ledger_oauth::auth::TokenRecord;
///
/// let record = TokenRecord {
///     access_token: "access".to_string(),
///     refresh_token: "refresh".to_string(),
///     access_expires_at: Utc::now() + Duration::hours(1),
///     refresh_expires_at: None,
///     realm: "9341454425005330".to_string(),
///     issued_at: Utc::now(),
/// };
/// assert!(record.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub realm: String,
    pub issued_at: DateTime<Utc>,
}

impl TokenRecord {
    /// True when the access token outlives `now + margin`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.access_expires_at - margin
    }

    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at.is_some_and(|at| now >= at)
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.realm.trim().is_empty() {
            return Err(AuthError::Persistence("token record has no realm".to_string()));
        }
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return Err(AuthError::Persistence(format!(
                "token record for realm {} is incomplete",
                self.realm
            )));
        }
        Ok(())
    }
}
