use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Revocation record persisted for every issued access token.
///
/// A token is live only while `is_logged_in && !is_expired && now < expires_utc`;
/// the ticket's own expiry must agree as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAuthToken {
    pub id: Uuid,
    pub user_id: i64,
    pub client_id: String,
    pub issued_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    /// SHA-256 of the access token; the token itself is never stored.
    pub access_token_hash: String,
    pub is_logged_in: bool,
    pub is_expired: bool,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Set when an impersonator holds this session on the user's behalf.
    #[serde(default)]
    pub impersonating_user_id: Option<i64>,
}

impl UserAuthToken {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_logged_in && !self.is_expired && now < self.expires_utc
    }
}
