use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::AllowAnonymous;
use crate::{
    identity::Principal,
    services::{AuthFailure, ServiceError},
    AppState,
};

/// Resource and permission a route demands. Attach with an `Extension`
/// layer outside [`authorize_middleware`]. A missing permission is derived
/// from the request method.
#[derive(Debug, Clone, Default)]
pub struct AccessRequirement {
    pub resource: Option<String>,
    pub permission: Option<String>,
}

impl AccessRequirement {
    pub fn new(resource: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            permission: Some(permission.into()),
        }
    }

    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            permission: None,
        }
    }
}

pub async fn authorize_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.extensions().get::<AllowAnonymous>().is_some() {
        return Ok(next.run(req).await);
    }

    let Some(principal) = req.extensions().get::<Principal>() else {
        return Err(AppError::unauthorized(AuthFailure::NoPrincipal.to_string()));
    };
    let requirement = req
        .extensions()
        .get::<AccessRequirement>()
        .cloned()
        .unwrap_or_default();

    let authorized = state
        .authorization
        .is_authorized(
            principal,
            requirement.resource.as_deref(),
            requirement.permission.as_deref(),
            Some(req.method()),
        )
        .await?;

    if !authorized {
        return Err(ServiceError::AccessDenied.into());
    }

    Ok(next.run(req).await)
}
