//! Shared setup for the gateway integration tests: an in-process router over
//! a seeded in-memory credential store.

#![allow(dead_code)]

use auth_gateway::{
    build_router,
    config::{AuthOptions, Environment, GatewayConfig, TokenOptions},
    models::{ApplicationType, Role, RuleEffect},
    store::{
        CredentialStore, MemoryStore, SeedClient, SeedFile, SeedResource, SeedRule, SeedUser,
    },
    AppState, IMPERSONATION_PERMISSION, IMPERSONATION_RESOURCE,
};
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use axum_extra::extract::cookie::Cookie;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "correct";
pub const NATIVE_SECRET: &str = "s3cret";
pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;
/// Resource admins may read but not delete.
pub const REPORTS: &str = "Reports";

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl TestResponse {
    pub fn message(&self) -> &str {
        self.body["Message"].as_str().unwrap_or_default()
    }

    /// Value of a cookie set by the response.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v.to_string()).ok())
            .find(|c| c.name() == name)
            .map(|c| c.value().to_string())
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "auth-gateway-test".to_string(),
        service_version: "test".to_string(),
        log_level: "info".to_string(),
        otlp_endpoint: None,
        auth: AuthOptions::default(),
        tokens: TokenOptions {
            ticket_secret: "integration-ticket-secret-0123456789abcdef".to_string(),
            impersonation_secret: "integration-impersonation-secret".to_string(),
            access_token_expiry_minutes: 20,
            impersonation_nonce_seconds: 60,
            default_client_id: "web".to_string(),
            store_timeout_ms: 2000,
        },
        seed_path: None,
        allowed_origins: vec!["http://localhost:3000".to_string()],
        suppress_exception_detail: true,
    }
}

fn user(user_id: i64, username: &str, roles: &[&str], enabled: bool) -> SeedUser {
    SeedUser {
        user_id,
        username: username.to_string(),
        password: PASSWORD.to_string(),
        security_id: None,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        full_name: format!("{} Example", username),
        culture: "en-US".to_string(),
        enabled,
    }
}

pub fn test_seed() -> SeedFile {
    SeedFile {
        roles: vec![Role::new("admin")],
        users: vec![
            user(ALICE, "alice", &["admin"], true),
            user(BOB, "bob", &[], true),
            user(CAROL, "carol", &[], false),
        ],
        clients: vec![
            SeedClient {
                client_id: "web".to_string(),
                secret: String::new(),
                name: "Web".to_string(),
                application_type: ApplicationType::JavaScript,
                active: true,
                refresh_token_lifetime_minutes: 60,
                allowed_origin: "http://localhost:3000".to_string(),
                access_token_expiry_minutes: None,
            },
            SeedClient {
                client_id: "native".to_string(),
                secret: NATIVE_SECRET.to_string(),
                name: "Native".to_string(),
                application_type: ApplicationType::NativeConfidential,
                active: true,
                refresh_token_lifetime_minutes: 0,
                allowed_origin: String::new(),
                access_token_expiry_minutes: None,
            },
        ],
        resources: vec![
            SeedResource {
                id: None,
                name: IMPERSONATION_RESOURCE.to_string(),
            },
            SeedResource {
                id: None,
                name: REPORTS.to_string(),
            },
        ],
        permissions: Vec::new(),
        rules: vec![
            SeedRule {
                role: Some("admin".to_string()),
                user: None,
                resource: IMPERSONATION_RESOURCE.to_string(),
                permission: IMPERSONATION_PERMISSION.to_string(),
                effect: RuleEffect::Grant,
            },
            SeedRule {
                role: Some("admin".to_string()),
                user: None,
                resource: REPORTS.to_string(),
                permission: "Read".to_string(),
                effect: RuleEffect::Grant,
            },
        ],
    }
}

#[derive(Clone)]
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let store = Arc::new(MemoryStore::from_seed(test_seed()).expect("seed should load"));
        Self::with_store(config, store.clone(), store)
    }

    /// Run the app over `backend` while keeping direct access to the
    /// underlying memory store.
    pub fn with_store(
        config: GatewayConfig,
        store: Arc<MemoryStore>,
        backend: Arc<dyn CredentialStore>,
    ) -> Self {
        let state = AppState::new(config, backend).expect("state should build");
        Self {
            router: build_router(state.clone()),
            state,
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should collect")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post_token(&self, form: &[(&str, &str)]) -> TestResponse {
        let body = serde_urlencoded::to_string(form).expect("form should encode");
        self.send(
            Request::builder()
                .method("POST")
                .uri("/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Password grant through the token endpoint, superseding any live session.
    pub async fn token_for(&self, username: &str) -> String {
        let res = self
            .post_token(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", PASSWORD),
                ("client_id", "web"),
                ("forceLogin", "true"),
            ])
            .await;
        assert_eq!(res.status, StatusCode::OK, "token request failed: {}", res.body);
        res.body["access_token"]
            .as_str()
            .expect("access_token present")
            .to_string()
    }

    pub async fn get_bearer(&self, path: &str, token: &str) -> TestResponse {
        self.send(
            Request::builder()
                .uri(path)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn json_bearer(
        &self,
        method: &str,
        path: &str,
        token: &str,
        body: serde_json::Value,
    ) -> TestResponse {
        self.send(
            Request::builder()
                .method(method)
                .uri(path)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn logout(&self, token: &str) -> TestResponse {
        self.send(
            Request::builder()
                .method("PUT")
                .uri("/api/Authentication/Logout")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}
