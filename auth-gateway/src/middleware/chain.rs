//! Ordered authentication strategies. The first strategy that produces a
//! principal wins; the rest are not consulted.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::{CsrfGuard, RequestMeta};
use crate::config::AuthOptions;
use crate::identity::{authentication_types, build_identity, Principal};
use crate::services::{bounded, AuthFailure, ServiceError, TokenValidator};
use crate::store::CredentialStore;
use crate::ticket::Purpose;
use crate::utils::{verify_password, Password};

/// Principal produced by a strategy.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub principal: Principal,
    pub expires_utc: Option<DateTime<Utc>>,
    pub strategy: &'static str,
}

#[derive(Debug)]
pub enum StrategyOutcome {
    Authenticated(Authenticated),
    /// The request carries no credentials this strategy understands.
    NotApplicable,
    Failed(AuthFailure),
    /// Infrastructure failure; aborts the chain.
    Error(ServiceError),
}

impl From<Result<Authenticated, ServiceError>> for StrategyOutcome {
    fn from(result: Result<Authenticated, ServiceError>) -> Self {
        match result {
            Ok(auth) => StrategyOutcome::Authenticated(auth),
            Err(ServiceError::Auth(failure)) => StrategyOutcome::Failed(failure),
            Err(e) => StrategyOutcome::Error(e),
        }
    }
}

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Let the request through without a principal.
    fn skip_authorization(&self, meta: &RequestMeta) -> bool {
        meta.allow_anonymous
    }

    /// Whether a principal from this strategy must pass the CSRF check.
    fn requires_csrf(&self) -> bool {
        false
    }

    async fn authenticate(&self, meta: &RequestMeta) -> StrategyOutcome;
}

/// `Authorization: <scheme> <access_token>` validated by the token validator.
pub struct BearerStrategy {
    validator: Arc<TokenValidator>,
    scheme: String,
}

impl BearerStrategy {
    pub fn new(validator: Arc<TokenValidator>, scheme: impl Into<String>) -> Self {
        Self {
            validator,
            scheme: scheme.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for BearerStrategy {
    fn name(&self) -> &'static str {
        "bearer"
    }

    async fn authenticate(&self, meta: &RequestMeta) -> StrategyOutcome {
        let Some(token) = meta.authorization(&self.scheme) else {
            return StrategyOutcome::NotApplicable;
        };

        self.validator
            .validate(token, Purpose::AccessToken)
            .await
            .map(|ticket| Authenticated {
                expires_utc: ticket.properties.expires_utc,
                principal: Principal::new(ticket.identity),
                strategy: self.name(),
            })
            .into()
    }
}

/// Protected ticket carried in the auth cookie, or in a query parameter
/// where cookies are unavailable.
pub struct CookieStrategy {
    validator: Arc<TokenValidator>,
    cookie_name: String,
    query_name: String,
}

impl CookieStrategy {
    pub fn new(
        validator: Arc<TokenValidator>,
        cookie_name: impl Into<String>,
        query_name: impl Into<String>,
    ) -> Self {
        Self {
            validator,
            cookie_name: cookie_name.into(),
            query_name: query_name.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for CookieStrategy {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn requires_csrf(&self) -> bool {
        true
    }

    async fn authenticate(&self, meta: &RequestMeta) -> StrategyOutcome {
        let Some(ticket) = meta
            .cookie(&self.cookie_name)
            .or_else(|| meta.query_param(&self.query_name))
        else {
            return StrategyOutcome::NotApplicable;
        };

        self.validator
            .validate(ticket, Purpose::Cookie)
            .await
            .map(|ticket| Authenticated {
                expires_utc: ticket.properties.expires_utc,
                principal: Principal::new(ticket.identity),
                strategy: self.name(),
            })
            .into()
    }
}

/// `Authorization: Basic base64(username:password)` checked against the store.
pub struct BasicStrategy {
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
}

impl BasicStrategy {
    pub fn new(store: Arc<dyn CredentialStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn check(&self, username: &str, password: Password) -> Result<Authenticated, ServiceError> {
        let account = bounded(self.timeout, self.store.find_account_by_username(username))
            .await?
            .ok_or(AuthFailure::InvalidCredentials)?;

        let stored = account.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password check failed: {}", e)))?;
        if !matches || !account.identity.enabled {
            return Err(AuthFailure::InvalidCredentials.into());
        }

        Ok(Authenticated {
            principal: Principal::new(build_identity(
                &account.identity,
                authentication_types::BASIC,
                None,
            )),
            expires_utc: None,
            strategy: self.name(),
        })
    }
}

#[async_trait]
impl AuthStrategy for BasicStrategy {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn authenticate(&self, meta: &RequestMeta) -> StrategyOutcome {
        let Some(encoded) = meta.authorization("Basic") else {
            return StrategyOutcome::NotApplicable;
        };

        let decoded = STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        let Some((username, password)) = decoded.as_deref().and_then(|s| s.split_once(':')) else {
            return StrategyOutcome::Failed(AuthFailure::InvalidCredentials);
        };

        self.check(username, Password::new(password)).await.into()
    }
}

pub struct AuthenticationChain {
    strategies: Vec<Arc<dyn AuthStrategy>>,
    csrf: Option<CsrfGuard>,
}

impl AuthenticationChain {
    pub fn new(csrf: Option<CsrfGuard>) -> Self {
        Self {
            strategies: Vec::new(),
            csrf,
        }
    }

    /// Register the strategies enabled in `options`: bearer, then cookie,
    /// then basic.
    pub fn from_options(
        options: &AuthOptions,
        validator: Arc<TokenValidator>,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> Self {
        let csrf = options
            .csrf_enabled
            .then(|| CsrfGuard::new(&options.csrf_cookie_name, &options.csrf_header_name));
        let mut chain = Self::new(csrf);

        if options.bearer_auth_enabled {
            chain = chain.with_strategy(Arc::new(BearerStrategy::new(
                validator.clone(),
                &options.header_scheme,
            )));
        }
        if options.cookie_auth_enabled {
            chain = chain.with_strategy(Arc::new(CookieStrategy::new(
                validator,
                &options.auth_cookie_name,
                &options.auth_query_name,
            )));
        }
        if options.basic_auth_enabled {
            chain = chain.with_strategy(Arc::new(BasicStrategy::new(store, timeout)));
        }
        chain
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn AuthStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// `Ok(None)` when a strategy lets the request skip authentication.
    /// With no winner, fails with the last strategy's failure, or
    /// `MissingAccessToken` when no strategy recognised any credentials.
    pub async fn authenticate(
        &self,
        meta: &RequestMeta,
    ) -> Result<Option<Authenticated>, ServiceError> {
        if self.strategies.iter().any(|s| s.skip_authorization(meta)) {
            return Ok(None);
        }

        let mut last_failure = None;
        for strategy in &self.strategies {
            match strategy.authenticate(meta).await {
                StrategyOutcome::Authenticated(auth) => {
                    if strategy.requires_csrf() {
                        if let Some(csrf) = &self.csrf {
                            csrf.verify(meta)?;
                        }
                    }
                    tracing::debug!(
                        strategy = auth.strategy,
                        user = auth.principal.identity().name().unwrap_or("-"),
                        "Request authenticated"
                    );
                    return Ok(Some(auth));
                }
                StrategyOutcome::NotApplicable => {}
                StrategyOutcome::Failed(failure) => {
                    tracing::debug!(strategy = strategy.name(), %failure, "Strategy rejected request");
                    last_failure = Some(failure);
                }
                StrategyOutcome::Error(e) => return Err(e),
            }
        }

        Err(last_failure
            .unwrap_or(AuthFailure::MissingAccessToken)
            .into())
    }
}
