use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "correct")]
    pub password: String,

    #[serde(default)]
    pub remember_me: bool,

    #[serde(default)]
    pub force_login: bool,

    /// Defaults to the gateway's configured client.
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonateRequest {
    #[validate(range(min = 1, message = "User id must be positive"))]
    #[schema(example = 42)]
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(min_length = 8)]
    pub new_password: String,
}

/// Claim bundle of the authenticated caller.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ClaimsResponse {
    pub name: String,
    pub authentication_type: String,
    pub username: String,
    pub security_id: String,
    pub roles: Vec<String>,
    pub auth_token_id: String,
    /// Seconds until the ticket expires.
    pub expires_in: i64,
    pub auth_client: String,
    pub full_name: String,
    pub is_impersonated: bool,
    pub impersonating_user_id: Option<i64>,
    pub culture: String,
}
