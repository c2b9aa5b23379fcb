use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use service_core::error::AppError;

use super::RequestMeta;
use crate::{
    identity::Principal,
    services::{AuthFailure, ServiceError},
    AppState,
};

/// Marks an endpoint as reachable without credentials.
#[derive(Debug, Clone, Copy)]
pub struct AllowAnonymous;

/// How the current principal was authenticated.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub expires_utc: Option<DateTime<Utc>>,
    pub strategy: &'static str,
}

/// Run the authentication chain and attach the principal to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let meta = RequestMeta::from_request(&req, state.config.auth.trust_forwarded_for);

    match state.chain.authenticate(&meta).await {
        Ok(Some(auth)) => {
            req.extensions_mut().insert(AuthContext {
                expires_utc: auth.expires_utc,
                strategy: auth.strategy,
            });
            req.extensions_mut().insert(auth.principal);
        }
        Ok(None) => {}
        Err(ServiceError::Auth(failure)) => {
            tracing::info!(
                path = %meta.path,
                method = %meta.method,
                %failure,
                "Authentication failed"
            );
            return Err(AppError::challenge(
                state.config.auth.header_scheme.as_str(),
                failure.to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(next.run(req).await)
}

/// Extractor for the authenticated principal.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
    pub context: AuthContext,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized(AuthFailure::NoPrincipal.to_string()))?;
        let context = parts.extensions.get::<AuthContext>().cloned().unwrap_or(AuthContext {
            expires_utc: None,
            strategy: "unknown",
        });

        Ok(AuthUser { principal, context })
    }
}
