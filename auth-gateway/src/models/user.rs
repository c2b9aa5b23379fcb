//! User identity model - the stored account a ticket identity is built from.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::PasswordHashString;

/// A role held by a user. The role's security id, not its name, is the unit
/// of authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub security_id: Uuid,
    pub name: String,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            security_id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Binding to an external authentication provider account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLogin {
    pub provider: String,
    pub provider_key: String,
}

/// User identity as held by the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: i64,
    /// Unique across the store.
    pub username: String,
    /// Stable for the lifetime of the identity.
    pub security_id: Uuid,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub logins: Vec<ExternalLogin>,
    /// Stamp bumped on every password change; tokens carry the value they
    /// were issued under.
    pub password_timestamp: i64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub culture: String,
    pub enabled: bool,
    #[serde(default)]
    pub auth_token_id: Option<Uuid>,
}

impl UserIdentity {
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            security_id: Uuid::new_v4(),
            roles: Vec::new(),
            logins: Vec::new(),
            password_timestamp: new_password_timestamp(None),
            full_name: String::new(),
            culture: String::new(),
            enabled: true,
            auth_token_id: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    /// Own security id followed by every role security id.
    pub fn security_ids(&self) -> Vec<Uuid> {
        std::iter::once(self.security_id)
            .chain(self.roles.iter().map(|r| r.security_id))
            .collect()
    }
}

/// Stored account: identity plus the argon2 password hash. The hash never
/// leaves the store boundary except for verification.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub identity: UserIdentity,
    pub password_hash: PasswordHashString,
}

/// Next password stamp: milliseconds since the epoch, strictly greater than
/// `previous` so two changes within one millisecond still differ.
pub fn new_password_timestamp(previous: Option<i64>) -> i64 {
    let now = Utc::now().timestamp_millis();
    match previous {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}
