use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{services::bounded, AppState};

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Credential store is unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    bounded(state.config.tokens.store_timeout(), state.store.health_check())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Credential store health check failed");
            AppError::from(e)
        })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "strategies": state.chain.strategy_names(),
        "checks": {
            "credential_store": "up"
        }
    })))
}
