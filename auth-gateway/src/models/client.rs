use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of application registered as an auth client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    /// Browser SPA; cannot keep a secret.
    #[serde(rename = "javascript")]
    JavaScript,
    /// Native/server application; must present its secret on every grant.
    NativeConfidential,
}

impl fmt::Display for ApplicationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApplicationType::JavaScript => write!(f, "javascript"),
            ApplicationType::NativeConfidential => write!(f, "native_confidential"),
        }
    }
}

/// OAuth client provisioned out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClient {
    pub client_id: String,
    /// Base64 SHA-256 of the shared secret.
    pub secret_hash: String,
    pub name: String,
    pub application_type: ApplicationType,
    pub active: bool,
    /// Refresh tokens are only issued when positive.
    pub refresh_token_lifetime_minutes: i64,
    pub allowed_origin: String,
    /// Overrides the gateway-wide access token lifetime when set.
    #[serde(default)]
    pub access_token_expiry_minutes: Option<i64>,
}

impl AuthClient {
    pub fn requires_secret(&self) -> bool {
        self.application_type == ApplicationType::NativeConfidential
    }
}
