//! Authentication tickets and their protection.

mod protector;

pub use protector::{Purpose, TicketError, TicketProtector};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::identity::Identity;

/// Property item carrying the client id the ticket was issued to.
pub const CLIENT_ID_ITEM: &str = "as:client_id";
/// Property item carrying the username the ticket was issued for.
pub const USER_NAME_ITEM: &str = "userName";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProperties {
    pub issued_utc: Option<DateTime<Utc>>,
    pub expires_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_persistent: bool,
    #[serde(default)]
    pub items: BTreeMap<String, String>,
}

impl AuthProperties {
    pub fn item(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.item(CLIENT_ID_ITEM)
    }

    /// Expired at or after `expires_utc`; a ticket without an expiry never is.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_utc, Some(expires) if now >= expires)
    }
}

/// Identity plus properties: the payload behind an access token or cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub identity: Identity,
    pub properties: AuthProperties,
}

impl Ticket {
    pub fn new(identity: Identity, properties: AuthProperties) -> Self {
        Self {
            identity,
            properties,
        }
    }
}
