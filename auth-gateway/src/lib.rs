pub mod config;
pub mod dtos;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod ticket;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::any::Any;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::GatewayConfig;
use crate::middleware::{
    auth_middleware, authorize_middleware, AccessRequirement, AllowAnonymous,
    AuthenticationChain,
};
use crate::services::{
    AuthorizationEngine, EnabledUserHook, GrantOptions, GrantProcessor, ImpersonationSigner,
    TokenValidator, ValidatorOptions,
};
use crate::store::CredentialStore;
use crate::ticket::TicketProtector;

/// Resource and permission guarding the impersonation endpoint.
pub const IMPERSONATION_RESOURCE: &str = "Impersonation";
pub const IMPERSONATION_PERMISSION: &str = "Allow";

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::token::token,
        handlers::authentication::login,
        handlers::authentication::logout,
        handlers::authentication::impersonate_user,
        handlers::authentication::revoke_impersonation,
        handlers::authentication::change_password,
        handlers::authentication::claims,
    ),
    components(
        schemas(
            dtos::MessageResponse,
            dtos::token::TokenRequest,
            dtos::token::TokenResponse,
            dtos::token::OAuthErrorResponse,
            dtos::authentication::LoginRequest,
            dtos::authentication::ImpersonateRequest,
            dtos::authentication::ChangePasswordRequest,
            dtos::authentication::ClaimsResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "OAuth", description = "Token issuance"),
        (name = "Authentication", description = "Sign-in, sign-out and impersonation"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub protector: Arc<TicketProtector>,
    pub validator: Arc<TokenValidator>,
    pub chain: Arc<AuthenticationChain>,
    pub authorization: Arc<AuthorizationEngine>,
    pub grants: Arc<GrantProcessor>,
    pub signer: Arc<ImpersonationSigner>,
}

impl AppState {
    /// Wire every gateway component over `store`.
    pub fn new(config: GatewayConfig, store: Arc<dyn CredentialStore>) -> Result<Self, AppError> {
        config.validate()?;
        let timeout = config.tokens.store_timeout();

        let protector = Arc::new(
            TicketProtector::new(config.tokens.ticket_secret.as_bytes())
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
        );
        let signer = Arc::new(
            ImpersonationSigner::new(
                &config.tokens.impersonation_secret,
                config.tokens.impersonation_nonce_seconds,
            )
            .map_err(AppError::ConfigError)?,
        );

        let hook = Arc::new(EnabledUserHook::new(store.clone(), timeout));
        let validator = Arc::new(TokenValidator::new(
            store.clone(),
            protector.clone(),
            hook,
            ValidatorOptions::from(&config.auth),
            timeout,
        ));
        let chain = Arc::new(AuthenticationChain::from_options(
            &config.auth,
            validator.clone(),
            store.clone(),
            timeout,
        ));
        let authorization = Arc::new(AuthorizationEngine::new(
            store.clone(),
            config.auth.bypass_authorization,
            timeout,
        ));
        let grants = Arc::new(GrantProcessor::new(
            store.clone(),
            protector.clone(),
            signer.clone(),
            GrantOptions::from_config(&config).map_err(AppError::ConfigError)?,
        ));

        tracing::info!(
            strategies = ?chain.strategy_names(),
            csrf = config.auth.csrf_enabled,
            db_token_validation = config.auth.db_token_validation,
            password_change_validation = config.auth.password_change_validation,
            allow_multiple_instances = config.auth.allow_multiple_instances,
            "Authentication pipeline configured"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            protector,
            validator,
            chain,
            authorization,
            grants,
            signer,
        })
    }
}

/// Put `router` behind the authentication chain and the authorization check.
/// Layer an `Extension(AccessRequirement)` on the result to demand a resource;
/// the request runs through the requirement, then authentication, then
/// authorization.
pub fn protect(state: &AppState, router: Router<AppState>) -> Router<AppState> {
    router
        .layer(from_fn_with_state(state.clone(), authorize_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
}

pub fn build_router(state: AppState) -> Router {
    let protected = |router: Router<AppState>| protect(&state, router);

    let authenticated = protected(
        Router::new()
            .route("/api/Authentication/claims", get(handlers::claims))
            .route(
                "/api/Authentication/ChangePassword",
                post(handlers::change_password),
            )
            .route(
                "/api/Authentication/RevokeImpersonation",
                post(handlers::revoke_impersonation),
            ),
    );

    let impersonation = protected(Router::new().route(
        "/api/Authentication/ImpersonateUser",
        post(handlers::impersonate_user),
    ))
    .layer(Extension(AccessRequirement::new(
        IMPERSONATION_RESOURCE,
        IMPERSONATION_PERMISSION,
    )));

    let anonymous = protected(
        Router::new().route("/api/Authentication/Logout", put(handlers::logout)),
    )
    .layer(Extension(AllowAnonymous));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/token", post(handlers::token))
        .route("/api/Authentication/Login", post(handlers::login))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(authenticated)
        .merge(impersonation)
        .merge(anonymous)
        .with_state(state.clone());

    let csrf_header = HeaderName::from_bytes(state.config.auth.csrf_header_name.as_bytes()).ok();
    let mut allow_headers = vec![header::AUTHORIZATION, header::CONTENT_TYPE];
    allow_headers.extend(csrf_header);

    let origins = state
        .config
        .allowed_origins
        .iter()
        .filter(|o| {
            let wildcard = o.as_str() == "*";
            if wildcard {
                tracing::warn!("Wildcard CORS origin ignored; credentials require explicit origins");
            }
            !wildcard
        })
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    app.layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::OPTIONS,
                ])
                .allow_headers(allow_headers)
                .allow_credentials(true),
        )
}

/// Render a handler panic as the generic 500 body.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::InternalError(anyhow::anyhow!("Handler panicked: {}", detail)).into_response()
}
