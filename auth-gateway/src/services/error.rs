use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use thiserror::Error;

use crate::dtos::token::OAuthErrorResponse;
use crate::store::StoreError;
use crate::ticket::TicketError;

/// Why a request could not be authenticated. The display form is the value
/// reported to clients in the `Message` body and the challenge header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("InvalidCredentials")]
    InvalidCredentials,
    #[error("InvalidClient")]
    InvalidClient,
    #[error("InvalidBearerToken")]
    InvalidBearerToken,
    #[error("TokenExpired")]
    TokenExpired,
    #[error("UserSessionExpired")]
    UserSessionExpired,
    #[error("AlteredCredential")]
    AlteredCredential,
    #[error("MissingAccessToken")]
    MissingAccessToken,
    #[error("NoPrincipal")]
    NoPrincipal,
    #[error("CsrfTokenMismatch")]
    CsrfMismatch,
}

/// Message returned for every ACL denial.
pub const ACL_DENIED_MESSAGE: &str =
    "Authorization has been denied for this request due to ACL on resource";

/// OAuth protocol failure from the token endpoint. Carries the HTTP status
/// the response must use.
#[derive(Debug, Clone, Error)]
#[error("{error}: {description}")]
pub struct GrantError {
    pub error: &'static str,
    pub description: String,
    pub status: StatusCode,
}

impl GrantError {
    pub const INVALID_CLIENT: &'static str = "invalid_clientId";
    pub const INVALID_GRANT: &'static str = "invalid_grant";
    pub const INVALID_REQUEST: &'static str = "invalid_request";
    pub const SESSION_REJECTED: &'static str = "session_rejected";
    pub const UNSUPPORTED_GRANT_TYPE: &'static str = "unsupported_grant_type";
    pub const SERVER_ERROR: &'static str = "server_error";

    fn new(error: &'static str, description: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error,
            description: description.into(),
            status,
        }
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(Self::INVALID_CLIENT, description, StatusCode::UNAUTHORIZED)
    }

    /// Wrong username or password, bad impersonation nonce.
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(Self::INVALID_GRANT, description, StatusCode::UNAUTHORIZED)
    }

    /// Unknown, expired or already redeemed refresh token.
    pub fn invalid_refresh(description: impl Into<String>) -> Self {
        Self::new(Self::INVALID_GRANT, description, StatusCode::BAD_REQUEST)
    }

    pub fn disabled_user() -> Self {
        Self::new(
            Self::INVALID_GRANT,
            "The user account is disabled.",
            StatusCode::FORBIDDEN,
        )
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, description, StatusCode::BAD_REQUEST)
    }

    pub fn session_rejected() -> Self {
        Self::new(
            Self::SESSION_REJECTED,
            "The user already has an active session.",
            StatusCode::CONFLICT,
        )
    }

    pub fn unsupported_grant_type(grant_type: &str) -> Self {
        Self::new(
            Self::UNSUPPORTED_GRANT_TYPE,
            format!("Grant type '{}' is not supported.", grant_type),
            StatusCode::BAD_REQUEST,
        )
    }

    /// Credential store did not answer in time.
    pub fn upstream_timeout() -> Self {
        Self::new(
            Self::INVALID_GRANT,
            "The credential store did not respond in time.",
            StatusCode::BAD_GATEWAY,
        )
    }

    pub fn server_error() -> Self {
        Self::new(
            Self::SERVER_ERROR,
            "The token could not be issued.",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}

impl IntoResponse for GrantError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(OAuthErrorResponse {
                error: self.error.to_string(),
                error_description: self.description,
            }),
        )
            .into_response()
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ticket error: {0}")]
    Ticket(#[from] TicketError),

    #[error("Credential store timed out")]
    Timeout,

    #[error("Authentication failed: {0}")]
    Auth(AuthFailure),

    #[error(transparent)]
    Grant(#[from] GrantError),

    #[error("Authorization denied")]
    AccessDenied,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AuthFailure> for ServiceError {
    fn from(failure: AuthFailure) -> Self {
        ServiceError::Auth(failure)
    }
}

impl ServiceError {
    /// Map onto the token endpoint's OAuth error shape.
    pub fn into_grant_error(self) -> GrantError {
        match self {
            ServiceError::Grant(e) => e,
            ServiceError::Timeout => GrantError::upstream_timeout(),
            ServiceError::BadRequest(msg) => GrantError::invalid_request(msg),
            ServiceError::Auth(failure) => GrantError::invalid_grant(failure.to_string()),
            other => {
                tracing::error!(error = %other, "Token issuance failed");
                GrantError::server_error()
            }
        }
    }
}

impl From<ServiceError> for GrantError {
    fn from(err: ServiceError) -> Self {
        err.into_grant_error()
    }
}

impl From<TicketError> for GrantError {
    fn from(err: TicketError) -> Self {
        ServiceError::Ticket(err).into_grant_error()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Auth(failure) => AppError::unauthorized(failure.to_string()),
            ServiceError::AccessDenied => {
                AppError::Forbidden(anyhow::anyhow!(ACL_DENIED_MESSAGE))
            }
            ServiceError::BadRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Grant(e) => match e.status {
                StatusCode::BAD_REQUEST => AppError::BadRequest(anyhow::anyhow!(e.description)),
                StatusCode::UNAUTHORIZED => AppError::unauthorized(e.description),
                StatusCode::FORBIDDEN => AppError::Forbidden(anyhow::anyhow!(e.description)),
                StatusCode::CONFLICT => AppError::Conflict(anyhow::anyhow!(e.description)),
                StatusCode::BAD_GATEWAY => AppError::BadGateway(e.description),
                _ => AppError::InternalError(anyhow::anyhow!(e.description)),
            },
            ServiceError::Timeout => {
                AppError::InternalError(anyhow::anyhow!("Credential store timed out"))
            }
            ServiceError::Store(e) => AppError::InternalError(anyhow::Error::new(e)),
            ServiceError::Ticket(e) => AppError::InternalError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_render_as_their_kind() {
        assert_eq!(AuthFailure::UserSessionExpired.to_string(), "UserSessionExpired");
        assert_eq!(AuthFailure::CsrfMismatch.to_string(), "CsrfTokenMismatch");
    }

    #[test]
    fn timeout_becomes_bad_gateway_grant() {
        let grant = ServiceError::Timeout.into_grant_error();
        assert_eq!(grant.status, StatusCode::BAD_GATEWAY);
        assert_eq!(grant.error, GrantError::INVALID_GRANT);
    }

    #[test]
    fn access_denied_is_forbidden() {
        let app: AppError = ServiceError::AccessDenied.into();
        assert_eq!(app.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn session_rejected_is_conflict() {
        let app: AppError = ServiceError::Grant(GrantError::session_rejected()).into();
        assert_eq!(app.status(), StatusCode::CONFLICT);
    }
}
