use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Longest access or refresh token lifetime a deployment or client may set.
pub const MAX_TOKEN_LIFETIME_MINUTES: i64 = 60 * 24 * 365;

/// Longest window an impersonation nonce stays redeemable.
pub const MAX_NONCE_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub auth: AuthOptions,
    pub tokens: TokenOptions,
    pub seed_path: Option<String>,
    pub allowed_origins: Vec<String>,
    /// Hide underlying error text from 500 responses.
    pub suppress_exception_detail: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Switches for the authentication and authorization pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthOptions {
    pub bearer_auth_enabled: bool,
    pub cookie_auth_enabled: bool,
    pub basic_auth_enabled: bool,
    pub csrf_enabled: bool,
    pub csrf_cookie_name: String,
    pub csrf_header_name: String,
    /// Check every bearer token against its stored session record.
    pub db_token_validation: bool,
    /// Reject tokens issued before the user's latest password change.
    pub password_change_validation: bool,
    pub allow_multiple_instances: bool,
    pub bypass_authorization: bool,
    pub auth_cookie_name: String,
    /// Query-string parameter carrying the cookie ticket when cookies are unavailable.
    pub auth_query_name: String,
    /// Scheme expected in the `Authorization` header for bearer tokens.
    pub header_scheme: String,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            bearer_auth_enabled: true,
            cookie_auth_enabled: true,
            basic_auth_enabled: false,
            csrf_enabled: true,
            csrf_cookie_name: "XSRF-TOKEN".to_string(),
            csrf_header_name: "X-XSRF-TOKEN".to_string(),
            db_token_validation: true,
            password_change_validation: true,
            allow_multiple_instances: false,
            bypass_authorization: false,
            auth_cookie_name: ".AspNet.AuthCookie".to_string(),
            auth_query_name: "auth_ticket".to_string(),
            header_scheme: "Bearer".to_string(),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenOptions {
    pub ticket_secret: String,
    pub impersonation_secret: String,
    pub access_token_expiry_minutes: i64,
    /// Lifetime of the nonce minted for an impersonation request.
    pub impersonation_nonce_seconds: i64,
    /// Client the Login/Impersonate wrappers grant on behalf of.
    pub default_client_id: String,
    /// Upper bound on every credential store call made while issuing or
    /// validating a token.
    pub store_timeout_ms: u64,
}

impl TokenOptions {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = AuthOptions::default();

        let config = GatewayConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-gateway"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            auth: AuthOptions {
                bearer_auth_enabled: parse_env("AUTH_BEARER_ENABLED", "true")?,
                cookie_auth_enabled: parse_env("AUTH_COOKIE_ENABLED", "true")?,
                basic_auth_enabled: parse_env("AUTH_BASIC_ENABLED", "false")?,
                csrf_enabled: parse_env("AUTH_CSRF_ENABLED", "true")?,
                csrf_cookie_name: get_env(
                    "AUTH_CSRF_COOKIE_NAME",
                    Some(&defaults.csrf_cookie_name),
                    is_prod,
                )?,
                csrf_header_name: get_env(
                    "AUTH_CSRF_HEADER_NAME",
                    Some(&defaults.csrf_header_name),
                    is_prod,
                )?,
                db_token_validation: parse_env("AUTH_DB_TOKEN_VALIDATION", "true")?,
                password_change_validation: parse_env("AUTH_PASSWORD_CHANGE_VALIDATION", "true")?,
                allow_multiple_instances: parse_env("AUTH_ALLOW_MULTIPLE_INSTANCES", "false")?,
                bypass_authorization: parse_env("AUTH_BYPASS_AUTHORIZATION", "false")?,
                auth_cookie_name: get_env(
                    "AUTH_COOKIE_NAME",
                    Some(&defaults.auth_cookie_name),
                    is_prod,
                )?,
                auth_query_name: get_env(
                    "AUTH_QUERY_NAME",
                    Some(&defaults.auth_query_name),
                    is_prod,
                )?,
                header_scheme: get_env(
                    "AUTH_HEADER_SCHEME",
                    Some(&defaults.header_scheme),
                    is_prod,
                )?,
                trust_forwarded_for: parse_env("AUTH_TRUST_FORWARDED_FOR", "false")?,
            },
            tokens: TokenOptions {
                ticket_secret: get_env(
                    "TICKET_SECRET",
                    Some("dev-only-ticket-secret-change-me-0123456789"),
                    is_prod,
                )?,
                impersonation_secret: get_env(
                    "IMPERSONATION_SECRET",
                    Some("dev-only-impersonation-secret-change-me"),
                    is_prod,
                )?,
                access_token_expiry_minutes: parse_env("ACCESS_TOKEN_EXPIRY_MINUTES", "20")?,
                impersonation_nonce_seconds: parse_env("IMPERSONATION_NONCE_SECONDS", "60")?,
                default_client_id: get_env("DEFAULT_CLIENT_ID", Some("web"), is_prod)?,
                store_timeout_ms: parse_env("STORE_TIMEOUT_MS", "5000")?,
            },
            seed_path: env::var("SEED_PATH").ok().filter(|s| !s.is_empty()),
            allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            suppress_exception_detail: parse_env("SUPPRESS_EXCEPTION_DETAIL", "true")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.tokens.ticket_secret.len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TICKET_SECRET must be at least 32 bytes"
            )));
        }

        if self.tokens.impersonation_secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IMPERSONATION_SECRET must not be empty"
            )));
        }

        if !(1..=MAX_TOKEN_LIFETIME_MINUTES).contains(&self.tokens.access_token_expiry_minutes) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_EXPIRY_MINUTES must be between 1 and {}",
                MAX_TOKEN_LIFETIME_MINUTES
            )));
        }

        if !(1..=MAX_NONCE_SECONDS).contains(&self.tokens.impersonation_nonce_seconds) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IMPERSONATION_NONCE_SECONDS must be between 1 and {}",
                MAX_NONCE_SECONDS
            )));
        }

        if self.tokens.store_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_TIMEOUT_MS must be positive"
            )));
        }

        if !self.auth.bearer_auth_enabled
            && !self.auth.cookie_auth_enabled
            && !self.auth.basic_auth_enabled
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "At least one authentication strategy must be enabled"
            )));
        }

        if self.environment == Environment::Prod {
            if self.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.suppress_exception_detail {
                tracing::error!("Exception detail is exposed in production responses");
            }
        }

        if self.auth.bypass_authorization {
            tracing::warn!("Authorization bypass is enabled; resource checks will not run");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Optional tunable with a default in every environment.
fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
