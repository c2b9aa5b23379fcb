use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::hash_secret;

/// Refresh token record. The client receives a random GUID; only its hash is
/// stored, together with the protected ticket to restore on redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id_hash: String,
    /// Username the token was issued to.
    pub subject: String,
    pub client_id: String,
    pub issued_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub protected_ticket: String,
    /// Session (auth token) this refresh token extends.
    pub auth_token_id: Uuid,
}

impl RefreshToken {
    /// Mint a new refresh token, returning the plaintext handed to the client
    /// and the record to persist. `None` when the lifetime puts the expiry out
    /// of range.
    pub fn issue(
        subject: String,
        client_id: String,
        lifetime_minutes: i64,
        protected_ticket: String,
        auth_token_id: Uuid,
    ) -> Option<(String, Self)> {
        let now = Utc::now();
        let expires_utc = Duration::try_minutes(lifetime_minutes)
            .and_then(|lifetime| now.checked_add_signed(lifetime))?;
        let plaintext = Uuid::new_v4().simple().to_string();
        let record = Self {
            id_hash: hash_secret(&plaintext),
            subject,
            client_id,
            issued_utc: now,
            expires_utc,
            protected_ticket,
            auth_token_id,
        };
        Some((plaintext, record))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_utc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_hash_not_plaintext() {
        let (plaintext, record) = RefreshToken::issue(
            "alice".to_string(),
            "web".to_string(),
            60,
            "ticket".to_string(),
            Uuid::new_v4(),
        )
        .unwrap();
        assert_ne!(record.id_hash, plaintext);
        assert_eq!(record.id_hash, hash_secret(&plaintext));
        assert!(!record.is_expired(Utc::now()));
        assert!(record.is_expired(record.expires_utc));
    }

    #[test]
    fn absurd_lifetime_is_refused() {
        for minutes in [i64::MAX, i64::MAX / 1000, 200_000_000_000] {
            assert!(RefreshToken::issue(
                "alice".to_string(),
                "web".to_string(),
                minutes,
                "ticket".to_string(),
                Uuid::new_v4(),
            )
            .is_none());
        }
    }
}
