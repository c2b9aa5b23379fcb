use auth_gateway::{
    build_router,
    config::GatewayConfig,
    store::{load_seed, CredentialStore, MemoryStore},
    AppState,
};
use service_core::error::{set_exception_detail, AppError};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = GatewayConfig::from_env()?;
    set_exception_detail(!config.suppress_exception_detail);

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication gateway"
    );

    let store = match &config.seed_path {
        Some(path) => {
            let seed = load_seed(path)
                .await
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
            let store = MemoryStore::from_seed(seed)
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
            tracing::info!(path = %path, "Credential store seeded");
            store
        }
        None => {
            tracing::warn!("No SEED_PATH configured; starting with an empty credential store");
            MemoryStore::new()
        }
    };
    let store: Arc<dyn CredentialStore> = Arc::new(store);

    let addr: SocketAddr = format!("{}:{}", config.common.host, config.common.port)
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;
    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );

    let state = AppState::new(config, store)?;
    let app = build_router(state);

    let _guard = service_span.enter();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
