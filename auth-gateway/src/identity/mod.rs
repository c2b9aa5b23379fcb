//! Claims-based identity and principal.
//!
//! An [`Identity`] is a flat bag of typed claims with named accessors; a
//! [`Principal`] wraps exactly one identity and is what flows through request
//! extensions once a request has been authenticated.

mod builder;

pub use builder::build_identity;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Well-known claim type strings.
pub mod claim_types {
    pub const NAME: &str = "urn:authgateway:claims:name";
    pub const USER_ID: &str = "urn:authgateway:claims:userid";
    pub const SECURITY_ID: &str = "urn:authgateway:claims:sid";
    pub const GROUP_SID: &str = "urn:authgateway:claims:groupsid";
    pub const ROLE: &str = "urn:authgateway:claims:role";
    pub const AUTH_TOKEN_ID: &str = "urn:authgateway:claims:authtokenid";
    pub const AUTH_CLIENT_ID: &str = "urn:authgateway:claims:authclientid";
    pub const PASSWORD_TIMESTAMP: &str = "urn:authgateway:claims:passwordtimestamp";
    pub const FULL_NAME: &str = "urn:authgateway:claims:fullname";
    pub const IMPERSONATING_USER_ID: &str = "urn:authgateway:claims:impersonatinguserid";
    pub const CULTURE: &str = "urn:authgateway:claims:culture";
}

/// Authentication types stamped on identities by the strategy that produced them.
pub mod authentication_types {
    pub const BEARER: &str = "Bearer";
    pub const COOKIE: &str = "Cookie";
    pub const BASIC: &str = "Basic";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "t")]
    pub claim_type: String,
    #[serde(rename = "v")]
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub authentication_type: String,
    pub claims: Vec<Claim>,
}

impl Identity {
    pub fn new(authentication_type: impl Into<String>) -> Self {
        Self {
            authentication_type: authentication_type.into(),
            claims: Vec::new(),
        }
    }

    pub fn add_claim(&mut self, claim_type: &str, value: impl Into<String>) {
        self.claims.push(Claim::new(claim_type, value));
    }

    /// Replace every claim of `claim_type` with a single claim.
    pub fn set_claim(&mut self, claim_type: &str, value: impl Into<String>) {
        self.claims.retain(|c| c.claim_type != claim_type);
        self.add_claim(claim_type, value);
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    pub fn find_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// Non-empty value of the first claim of `claim_type`.
    fn value(&self, claim_type: &str) -> Option<&str> {
        self.find_first(claim_type).filter(|v| !v.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        !self.authentication_type.is_empty()
    }

    pub fn name(&self) -> Option<&str> {
        self.value(claim_types::NAME)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.value(claim_types::USER_ID)?.parse().ok()
    }

    pub fn security_id(&self) -> Option<Uuid> {
        self.value(claim_types::SECURITY_ID)?.parse().ok()
    }

    /// The authorization set: own security id plus every role security id.
    pub fn security_ids(&self) -> Vec<Uuid> {
        self.security_id()
            .into_iter()
            .chain(
                self.find_all(claim_types::GROUP_SID)
                    .filter_map(|v| v.parse().ok()),
            )
            .collect()
    }

    pub fn roles(&self) -> BTreeSet<String> {
        self.find_all(claim_types::ROLE)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.find_all(claim_types::ROLE).any(|r| r == role)
    }

    pub fn auth_token_id(&self) -> Option<Uuid> {
        self.value(claim_types::AUTH_TOKEN_ID)?.parse().ok()
    }

    pub fn auth_client_id(&self) -> Option<&str> {
        self.value(claim_types::AUTH_CLIENT_ID)
    }

    pub fn password_timestamp(&self) -> Option<i64> {
        self.value(claim_types::PASSWORD_TIMESTAMP)?.parse().ok()
    }

    pub fn full_name(&self) -> Option<&str> {
        self.value(claim_types::FULL_NAME)
    }

    pub fn impersonating_user_id(&self) -> Option<i64> {
        self.value(claim_types::IMPERSONATING_USER_ID)?.parse().ok()
    }

    pub fn is_impersonated(&self) -> bool {
        self.impersonating_user_id().is_some()
    }

    pub fn culture(&self) -> Option<&str> {
        self.value(claim_types::CULTURE)
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    identity: Identity,
}

impl Principal {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.identity.is_in_role(role)
    }
}
