use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::form_flag;

/// Form body of `POST /token`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct TokenRequest {
    #[schema(example = "password")]
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "forceLogin", default, deserialize_with = "form_flag")]
    pub force_login: bool,
    #[serde(rename = "rememberMe", default, deserialize_with = "form_flag")]
    pub remember_me: bool,
    #[serde(default, deserialize_with = "form_flag")]
    pub impersonate: bool,
    /// Target of an impersonation grant, or the impersonated user on revoke.
    #[serde(rename = "impersonatingUserId", default)]
    pub impersonating_user_id: Option<String>,
    /// Signed nonce minted by the impersonation endpoints.
    #[serde(default)]
    pub random: Option<String>,
    #[serde(
        rename = "revoke_impesonation",
        alias = "revoke_impersonation",
        default,
        deserialize_with = "form_flag"
    )]
    pub revoke_impersonation: bool,
    /// Original user restored by a revoke grant.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl TokenRequest {
    pub fn password(username: &str, password: &str) -> Self {
        Self {
            grant_type: "password".to_string(),
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }
}

/// Successful `POST /token` response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    #[schema(example = "bearer")]
    pub token_type: String,
    #[schema(example = 1200)]
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "as:client_id")]
    pub client_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = ".issued")]
    #[schema(example = "Mon, 19 Oct 2026 10:00:00 GMT")]
    pub issued: String,
    #[serde(rename = ".expires")]
    #[schema(example = "Mon, 19 Oct 2026 10:20:00 GMT")]
    pub expires: String,
}

/// OAuth protocol failure body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OAuthErrorResponse {
    #[schema(example = "invalid_grant")]
    pub error: String,
    #[schema(example = "The user name or password is incorrect.")]
    pub error_description: String,
}
