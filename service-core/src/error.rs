use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Whether 500 responses carry the underlying error text. Off by default;
/// set once at start-up for non-production environments.
static EXPOSE_EXCEPTION_DETAIL: AtomicBool = AtomicBool::new(false);

pub fn set_exception_detail(expose: bool) {
    EXPOSE_EXCEPTION_DETAIL.store(expose, Ordering::Relaxed);
}

pub fn exception_detail_exposed() -> bool {
    EXPOSE_EXCEPTION_DETAIL.load(Ordering::Relaxed)
}

pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again later.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    /// Authentication failure. `scheme` populates the `WWW-Authenticate` challenge.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        scheme: Option<String>,
    },

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            message: message.into(),
            scheme: None,
        }
    }

    pub fn challenge(scheme: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            message: message.into(),
            scheme: Some(scheme.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

/// Generic API failure envelope.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "ExceptionMessage", skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.render(exception_detail_exposed())
    }
}

impl AppError {
    fn render(self, expose_detail: bool) -> Response {
        let status = self.status();
        let mut challenge = None;

        let (message, details) = match self {
            AppError::ValidationError(err) => ("Validation error".to_string(), Some(err.to_string())),
            AppError::BadRequest(err) => (err.to_string(), None),
            AppError::NotFound(err) => (err.to_string(), None),
            AppError::Unauthorized { message, scheme } => {
                challenge = scheme.map(|s| format!("{} error=\"{}\"", s, message));
                (message, None)
            }
            AppError::Forbidden(err) => (err.to_string(), None),
            AppError::Conflict(err) => (err.to_string(), None),
            AppError::BadGateway(msg) => (format!("Bad Gateway: {}", msg), None),
            AppError::ServiceUnavailable => ("Service unavailable".to_string(), None),
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Unhandled internal error");
                (GENERIC_FAILURE_MESSAGE.to_string(), Some(format!("{:#}", err)))
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                (GENERIC_FAILURE_MESSAGE.to_string(), Some(err.to_string()))
            }
        };

        // Details are only ever surfaced for client errors that carry them
        // (validation) or when exception detail is explicitly exposed.
        let exception_message = match status {
            StatusCode::INTERNAL_SERVER_ERROR if !expose_detail => None,
            _ => details,
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                message,
                exception_message,
            }),
        )
            .into_response();

        if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            res.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }

        res
    }
}
