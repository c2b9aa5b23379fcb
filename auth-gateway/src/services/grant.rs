//! OAuth2 token endpoint: client validation, the password grant with its
//! impersonation extensions, the refresh grant and session persistence.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{bounded, GrantError, ImpersonationSigner, NoncePurpose, ServiceError};
use crate::config::{GatewayConfig, MAX_TOKEN_LIFETIME_MINUTES};
use crate::dtos::token::{TokenRequest, TokenResponse};
use crate::identity::{authentication_types, build_identity, claim_types, Identity};
use crate::models::{AuthClient, RefreshToken, UserAuthToken, UserIdentity};
use crate::store::CredentialStore;
use crate::ticket::{AuthProperties, Purpose, Ticket, TicketProtector, CLIENT_ID_ITEM, USER_NAME_ITEM};
use crate::utils::{hash_secret, verify_password, verify_secret, Password};

const RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone)]
pub struct GrantOptions {
    pub access_token_expiry: ChronoDuration,
    pub allow_multiple: bool,
    /// Mirror every grant into a cookie ticket.
    pub cookie_auth_enabled: bool,
    pub db_token_validation: bool,
    pub password_change_validation: bool,
    pub timeout: Duration,
}

impl GrantOptions {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, anyhow::Error> {
        let minutes = config.tokens.access_token_expiry_minutes;
        let access_token_expiry = token_lifetime(minutes)
            .ok_or_else(|| anyhow::anyhow!("Invalid access token lifetime: {} minutes", minutes))?;
        Ok(Self {
            access_token_expiry,
            allow_multiple: config.auth.allow_multiple_instances,
            cookie_auth_enabled: config.auth.cookie_auth_enabled,
            db_token_validation: config.auth.db_token_validation,
            password_change_validation: config.auth.password_change_validation,
            timeout: config.tokens.store_timeout(),
        })
    }
}

/// Lifetime for a positive minute count no larger than
/// [`MAX_TOKEN_LIFETIME_MINUTES`].
fn token_lifetime(minutes: i64) -> Option<ChronoDuration> {
    if !(1..=MAX_TOKEN_LIFETIME_MINUTES).contains(&minutes) {
        return None;
    }
    ChronoDuration::try_minutes(minutes)
}

/// Client credentials presented to the token endpoint.
#[derive(Debug, Clone, Default)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// A well-formed `Authorization: Basic` header takes precedence over the
    /// form fields.
    pub fn from_request(headers: &HeaderMap, form: &TokenRequest) -> Self {
        if let Some(creds) = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic)
        {
            return creds;
        }

        Self {
            client_id: form.client_id.clone().filter(|s| !s.is_empty()),
            client_secret: form.client_secret.clone().filter(|s| !s.is_empty()),
        }
    }
}

fn parse_basic(value: &str) -> Option<ClientCredentials> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some(ClientCredentials {
        client_id: Some(id.to_string()).filter(|s| !s.is_empty()),
        client_secret: Some(secret.to_string()).filter(|s| !s.is_empty()),
    })
}

/// Client that passed authentication, with its effective token lifetime.
#[derive(Debug, Clone)]
pub struct ValidatedClient {
    pub client: AuthClient,
    pub access_token_lifetime: ChronoDuration,
}

#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// `Origin` header sent by a browser client.
    pub web_origin: Option<String>,
}

/// Result of a successful grant.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Present when cookie authentication is enabled.
    pub cookie_ticket: Option<String>,
    pub ticket: Ticket,
    pub client_id: String,
    /// Origin the client is registered for, echoed as
    /// `Access-Control-Allow-Origin`.
    pub allowed_origin: Option<String>,
}

impl IssuedToken {
    pub fn response(&self) -> TokenResponse {
        let issued = self.ticket.properties.issued_utc.unwrap_or_else(Utc::now);
        let expires = self.ticket.properties.expires_utc.unwrap_or(issued);
        TokenResponse {
            access_token: self.access_token.clone(),
            token_type: "bearer".to_string(),
            expires_in: (expires - issued).num_seconds().max(0),
            refresh_token: self.refresh_token.clone(),
            client_id: self.client_id.clone(),
            user_name: self.ticket.identity.name().unwrap_or_default().to_string(),
            issued: issued.format(RFC1123).to_string(),
            expires: expires.format(RFC1123).to_string(),
        }
    }
}

/// Identity resolved by a grant, before a session is attached.
struct ResolvedGrant {
    user: UserIdentity,
    impersonating_user_id: Option<i64>,
    allow_multiple: bool,
    auth_token_id: Option<Uuid>,
}

pub struct GrantProcessor {
    store: Arc<dyn CredentialStore>,
    protector: Arc<TicketProtector>,
    signer: Arc<ImpersonationSigner>,
    options: GrantOptions,
}

impl GrantProcessor {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        protector: Arc<TicketProtector>,
        signer: Arc<ImpersonationSigner>,
        options: GrantOptions,
    ) -> Self {
        Self {
            store,
            protector,
            signer,
            options,
        }
    }

    /// Run the whole token endpoint pipeline for one request.
    pub async fn process(
        &self,
        credentials: ClientCredentials,
        request: &TokenRequest,
        origin: &RequestOrigin,
    ) -> Result<IssuedToken, GrantError> {
        let client = self.validate_client_authentication(&credentials).await?;
        client.check_origin(origin)?;

        let result = match request.grant_type.as_str() {
            "password" => {
                let grant = self.grant_resource_owner_credentials(request).await?;
                self.issue(&client, grant, request.remember_me, origin).await
            }
            "refresh_token" => self.grant_refresh_token(&client, request, origin).await,
            "" => Err(GrantError::invalid_request("grant_type is required.")),
            other => Err(GrantError::unsupported_grant_type(other)),
        };

        if let Err(e) = &result {
            tracing::warn!(
                client_id = %client.client.client_id,
                grant_type = %request.grant_type,
                error = e.error,
                status = %e.status,
                "Grant rejected"
            );
        }
        result
    }

    pub async fn validate_client_authentication(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<ValidatedClient, GrantError> {
        let Some(client_id) = credentials.client_id.as_deref() else {
            return Err(GrantError::invalid_client("ClientId should be sent."));
        };

        let client = bounded(self.options.timeout, self.store.find_client(client_id))
            .await?
            .ok_or_else(|| {
                tracing::warn!(client_id, "Unknown client");
                GrantError::invalid_client(format!(
                    "Client '{}' is not registered in the system.",
                    client_id
                ))
            })?;

        if client.requires_secret() {
            let Some(secret) = credentials.client_secret.as_deref() else {
                return Err(GrantError::invalid_client("Client secret should be sent."));
            };
            if !verify_secret(secret, &client.secret_hash) {
                tracing::warn!(client_id, "Client secret mismatch");
                return Err(GrantError::invalid_client("Client secret is invalid."));
            }
        }

        if !client.active {
            tracing::warn!(client_id, "Inactive client");
            return Err(GrantError::invalid_client("Client is inactive."));
        }

        let access_token_lifetime = match client.access_token_expiry_minutes.filter(|m| *m > 0) {
            Some(minutes) => token_lifetime(minutes).ok_or_else(|| {
                tracing::error!(client_id, minutes, "Client access token lifetime out of range");
                GrantError::invalid_client("Client token lifetime is misconfigured.")
            })?,
            None => self.options.access_token_expiry,
        };

        Ok(ValidatedClient {
            client,
            access_token_lifetime,
        })
    }

    /// Password grant. Plain sign-in, impersonation and impersonation revoke
    /// are mutually exclusive.
    async fn grant_resource_owner_credentials(
        &self,
        request: &TokenRequest,
    ) -> Result<ResolvedGrant, GrantError> {
        match (request.impersonate, request.revoke_impersonation) {
            (true, true) => Err(GrantError::invalid_request(
                "impersonate and revoke_impesonation cannot both be set.",
            )),
            (true, false) => self.grant_impersonation(request).await,
            (false, true) => self.grant_revoke_impersonation(request).await,
            (false, false) => self.grant_password(request).await,
        }
    }

    async fn grant_password(&self, request: &TokenRequest) -> Result<ResolvedGrant, GrantError> {
        let username = request
            .username
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GrantError::invalid_request("username is required."))?;
        let password = request
            .password
            .as_deref()
            .ok_or_else(|| GrantError::invalid_request("password is required."))?;

        let account = bounded(
            self.options.timeout,
            self.store.find_account_by_username(username),
        )
        .await?;

        let Some(account) = account else {
            tracing::info!(username, "Sign-in for unknown user");
            return Err(GrantError::invalid_grant(
                "The user name or password is incorrect.",
            ));
        };

        let presented = Password::new(password);
        let stored = account.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&presented, &stored))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password check failed: {}", e)))?;

        if !matches {
            tracing::info!(user_id = account.identity.user_id, "Wrong password");
            return Err(GrantError::invalid_grant(
                "The user name or password is incorrect.",
            ));
        }

        let user = account.identity;
        if !user.enabled {
            return Err(GrantError::disabled_user());
        }

        // Sessions opened by an impersonator do not count against the user.
        if !self.options.allow_multiple && !request.force_login {
            let live = bounded(self.options.timeout, self.store.has_live_session(user.user_id))
                .await?;
            if live {
                return Err(GrantError::session_rejected());
            }
        }

        Ok(ResolvedGrant {
            user,
            impersonating_user_id: None,
            allow_multiple: self.options.allow_multiple,
            auth_token_id: None,
        })
    }

    async fn grant_impersonation(
        &self,
        request: &TokenRequest,
    ) -> Result<ResolvedGrant, GrantError> {
        let target = parse_user_id(request.impersonating_user_id.as_deref())
            .ok_or_else(|| GrantError::invalid_request("impersonatingUserId is required."))?;
        let nonce = request
            .random
            .as_deref()
            .ok_or_else(|| GrantError::invalid_request("random is required."))?;

        let acting = self
            .signer
            .verify(nonce, NoncePurpose::Impersonate, target)
            .ok_or_else(|| {
                tracing::warn!(target, "Impersonation nonce rejected");
                GrantError::invalid_grant("The impersonation request could not be verified.")
            })?;

        let user = self.enabled_user(target).await?;
        tracing::info!(acting_user_id = acting, target_user_id = target, "Impersonation granted");

        Ok(ResolvedGrant {
            user,
            impersonating_user_id: Some(acting),
            allow_multiple: true,
            auth_token_id: None,
        })
    }

    async fn grant_revoke_impersonation(
        &self,
        request: &TokenRequest,
    ) -> Result<ResolvedGrant, GrantError> {
        let original = parse_user_id(request.user_id.as_deref())
            .ok_or_else(|| GrantError::invalid_request("user_id is required."))?;
        let impersonated = parse_user_id(request.impersonating_user_id.as_deref())
            .ok_or_else(|| GrantError::invalid_request("impersonatingUserId is required."))?;
        let nonce = request
            .random
            .as_deref()
            .ok_or_else(|| GrantError::invalid_request("random is required."))?;

        match self.signer.verify(nonce, NoncePurpose::Revoke, impersonated) {
            Some(acting) if acting == original => {}
            _ => {
                tracing::warn!(original, impersonated, "Revoke nonce rejected");
                return Err(GrantError::invalid_grant(
                    "The impersonation revoke could not be verified.",
                ));
            }
        }

        let user = self.enabled_user(original).await?;
        tracing::info!(user_id = original, impersonated, "Impersonation revoked");

        Ok(ResolvedGrant {
            user,
            impersonating_user_id: None,
            allow_multiple: self.options.allow_multiple,
            auth_token_id: None,
        })
    }

    async fn enabled_user(&self, user_id: i64) -> Result<UserIdentity, GrantError> {
        let user = bounded(self.options.timeout, self.store.find_user_by_id(user_id))
            .await?
            .ok_or_else(|| GrantError::invalid_grant("The user does not exist."))?;
        if !user.enabled {
            return Err(GrantError::disabled_user());
        }
        Ok(user)
    }

    /// Redeem a refresh token and issue a new access token on the same session.
    pub async fn grant_refresh_token(
        &self,
        client: &ValidatedClient,
        request: &TokenRequest,
        origin: &RequestOrigin,
    ) -> Result<IssuedToken, GrantError> {
        let presented = request
            .refresh_token
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GrantError::invalid_request("refresh_token is required."))?;

        let record = bounded(
            self.options.timeout,
            self.store.redeem_refresh_token(&hash_secret(presented)),
        )
        .await?
        .ok_or_else(|| GrantError::invalid_refresh("The refresh token is invalid."))?;

        if record.client_id != client.client.client_id {
            tracing::warn!(
                issued_to = %record.client_id,
                presented_by = %client.client.client_id,
                "Refresh token presented by another client"
            );
            return Err(GrantError::invalid_client(
                "Refresh token is issued to a different clientId.",
            ));
        }

        if record.is_expired(Utc::now()) {
            return Err(GrantError::invalid_refresh("The refresh token has expired."));
        }

        let previous = self
            .protector
            .unprotect(&record.protected_ticket, Purpose::RefreshTicket)
            .ok_or_else(|| GrantError::invalid_refresh("The refresh token is invalid."))?;
        let user_id = previous
            .identity
            .user_id()
            .ok_or_else(|| GrantError::invalid_refresh("The refresh token is invalid."))?;

        let user = bounded(self.options.timeout, self.store.find_user_by_id(user_id))
            .await?
            .ok_or_else(|| GrantError::invalid_refresh("The user no longer exists."))?;
        if !user.enabled {
            return Err(GrantError::disabled_user());
        }

        if self.options.password_change_validation
            && previous.identity.password_timestamp() != Some(user.password_timestamp)
        {
            return Err(GrantError::invalid_refresh(
                "The password has changed since the token was issued.",
            ));
        }

        if self.options.db_token_validation {
            let session = bounded(
                self.options.timeout,
                self.store.find_auth_token_by_id(record.auth_token_id),
            )
            .await?;
            let live = matches!(
                session,
                Some(s) if s.user_id == user_id && s.is_logged_in && !s.is_expired
            );
            if !live {
                return Err(GrantError::invalid_refresh("The session has ended."));
            }
        }

        let grant = ResolvedGrant {
            user,
            impersonating_user_id: previous.identity.impersonating_user_id(),
            allow_multiple: true,
            auth_token_id: Some(record.auth_token_id),
        };
        self.issue(client, grant, previous.properties.is_persistent, origin)
            .await
    }

    /// Attach a session to the resolved identity, protect the tickets and
    /// persist everything the validator will later look up.
    async fn issue(
        &self,
        client: &ValidatedClient,
        grant: ResolvedGrant,
        remember_me: bool,
        origin: &RequestOrigin,
    ) -> Result<IssuedToken, GrantError> {
        let ResolvedGrant {
            mut user,
            impersonating_user_id,
            allow_multiple,
            auth_token_id,
        } = grant;
        let client_id = client.client.client_id.clone();

        let session_id = match auth_token_id {
            Some(id) => id,
            None => {
                bounded(
                    self.options.timeout,
                    self.store.generate_auth_token(user.user_id, allow_multiple),
                )
                .await?
            }
        };
        user.auth_token_id = Some(session_id);

        let now = Utc::now();
        let expires = now
            .checked_add_signed(client.access_token_lifetime)
            .ok_or_else(|| {
                tracing::error!(client_id = %client_id, "Access token expiry out of range");
                GrantError::server_error()
            })?;
        let mut identity = build_identity(&user, authentication_types::BEARER, impersonating_user_id);
        identity.set_claim(claim_types::AUTH_CLIENT_ID, client_id.as_str());

        let mut properties = AuthProperties {
            issued_utc: Some(now),
            expires_utc: Some(expires),
            is_persistent: remember_me,
            ..Default::default()
        };
        properties
            .items
            .insert(CLIENT_ID_ITEM.to_string(), client_id.clone());
        properties
            .items
            .insert(USER_NAME_ITEM.to_string(), user.username.clone());

        let ticket = Ticket::new(identity, properties);
        let access_token = self.protector.protect(&ticket, Purpose::AccessToken)?;

        let cookie_ticket = if self.options.cookie_auth_enabled {
            let cookie = Ticket::new(
                with_authentication_type(&ticket.identity, authentication_types::COOKIE),
                ticket.properties.clone(),
            );
            Some(self.protector.protect(&cookie, Purpose::Cookie)?)
        } else {
            None
        };

        let refresh_token = if client.client.refresh_token_lifetime_minutes > 0 {
            let protected = self.protector.protect(&ticket, Purpose::RefreshTicket)?;
            let (plaintext, record) = RefreshToken::issue(
                user.username.clone(),
                client_id.clone(),
                client.client.refresh_token_lifetime_minutes,
                protected,
                session_id,
            )
            .ok_or_else(|| {
                tracing::error!(client_id = %client_id, "Refresh token expiry out of range");
                GrantError::server_error()
            })?;
            bounded(self.options.timeout, self.store.add_refresh_token(record)).await?;
            Some(plaintext)
        } else {
            None
        };

        let issued = IssuedToken {
            access_token,
            refresh_token,
            cookie_ticket,
            ticket,
            client_id,
            allowed_origin: Some(client.client.allowed_origin.clone()).filter(|o| !o.is_empty()),
        };
        self.token_endpoint_response(&issued, origin, now).await?;

        tracing::info!(
            user_id = user.user_id,
            client_id = %issued.client_id,
            auth_token_id = %session_id,
            impersonated = impersonating_user_id.is_some(),
            "Token issued"
        );
        Ok(issued)
    }

    /// Persist the session row keyed by the new access token.
    async fn token_endpoint_response(
        &self,
        issued: &IssuedToken,
        origin: &RequestOrigin,
        now: DateTime<Utc>,
    ) -> Result<(), GrantError> {
        let identity = &issued.ticket.identity;
        let (Some(user_id), Some(session_id)) = (identity.user_id(), identity.auth_token_id())
        else {
            return Err(GrantError::server_error());
        };

        let record = UserAuthToken {
            id: session_id,
            user_id,
            client_id: issued.client_id.clone(),
            issued_utc: issued.ticket.properties.issued_utc.unwrap_or(now),
            expires_utc: issued
                .ticket
                .properties
                .expires_utc
                .ok_or_else(GrantError::server_error)?,
            access_token_hash: hash_secret(&issued.access_token),
            is_logged_in: true,
            is_expired: false,
            client_ip: origin.client_ip.clone(),
            user_agent: origin.user_agent.clone(),
            impersonating_user_id: identity.impersonating_user_id(),
        };
        bounded(self.options.timeout, self.store.save_auth_token(record)).await?;
        Ok(())
    }
}

impl ValidatedClient {
    /// A browser request must come from the origin the client is registered
    /// for. `*` or an empty registration admits any origin.
    pub fn check_origin(&self, origin: &RequestOrigin) -> Result<(), GrantError> {
        let allowed = self.client.allowed_origin.trim();
        let Some(presented) = origin.web_origin.as_deref() else {
            return Ok(());
        };
        if allowed.is_empty()
            || allowed == "*"
            || allowed.trim_end_matches('/').eq_ignore_ascii_case(presented.trim().trim_end_matches('/'))
        {
            return Ok(());
        }
        tracing::warn!(
            client_id = %self.client.client_id,
            origin = presented,
            "Origin not allowed for client"
        );
        Err(GrantError::invalid_client(format!(
            "Origin '{}' is not allowed for this client.",
            presented
        )))
    }
}

fn parse_user_id(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
}

fn with_authentication_type(identity: &Identity, authentication_type: &str) -> Identity {
    let mut copy = identity.clone();
    copy.authentication_type = authentication_type.to_string();
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicationType, Role};
    use crate::store::MemoryStore;
    use crate::utils::{hash_password, PasswordHashString};
    use axum::http::{HeaderValue, StatusCode};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct Fixture {
        store: Arc<MemoryStore>,
        protector: Arc<TicketProtector>,
        signer: Arc<ImpersonationSigner>,
        grants: GrantProcessor,
    }

    fn client(id: &str, kind: ApplicationType, secret: &str, refresh_minutes: i64) -> AuthClient {
        AuthClient {
            client_id: id.to_string(),
            secret_hash: hash_secret(secret),
            name: id.to_string(),
            application_type: kind,
            active: true,
            refresh_token_lifetime_minutes: refresh_minutes,
            allowed_origin: "*".to_string(),
            access_token_expiry_minutes: None,
        }
    }

    fn options(allow_multiple: bool) -> GrantOptions {
        GrantOptions {
            access_token_expiry: ChronoDuration::minutes(20),
            allow_multiple,
            cookie_auth_enabled: true,
            db_token_validation: true,
            password_change_validation: true,
            timeout: Duration::from_secs(5),
        }
    }

    fn fixture_with(options: GrantOptions) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hash = hash_password(&Password::new("correct")).unwrap();
        store
            .insert_user(
                UserIdentity::new(1, "alice").with_role(Role::new("admin")),
                hash.clone(),
            )
            .unwrap();
        store.insert_user(UserIdentity::new(2, "bob"), hash).unwrap();
        store.insert_client(client("web", ApplicationType::JavaScript, "", 60));
        store.insert_client(client(
            "native",
            ApplicationType::NativeConfidential,
            "s3cret",
            0,
        ));

        let protector = Arc::new(TicketProtector::new(SECRET).unwrap());
        let signer = Arc::new(ImpersonationSigner::new("imp-secret", 60).unwrap());
        let grants = GrantProcessor::new(store.clone(), protector.clone(), signer.clone(), options);
        Fixture {
            store,
            protector,
            signer,
            grants,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(options(false))
    }

    fn web() -> ClientCredentials {
        ClientCredentials {
            client_id: Some("web".to_string()),
            client_secret: None,
        }
    }

    async fn sign_in(f: &Fixture, username: &str) -> Result<IssuedToken, GrantError> {
        let mut request = TokenRequest::password(username, "correct");
        request.force_login = true;
        f.grants
            .process(web(), &request, &RequestOrigin::default())
            .await
    }

    #[tokio::test]
    async fn password_grant_issues_and_persists_session() {
        let f = fixture();
        let issued = f
            .grants
            .process(
                web(),
                &TokenRequest::password("alice", "correct"),
                &RequestOrigin::default(),
            )
            .await
            .unwrap();

        let ticket = f
            .protector
            .unprotect(&issued.access_token, Purpose::AccessToken)
            .unwrap();
        assert_eq!(ticket.identity.name(), Some("alice"));
        assert_eq!(ticket.identity.auth_client_id(), Some("web"));
        assert!(ticket.identity.is_in_role("admin"));
        assert!(issued.refresh_token.is_some());
        assert!(issued.cookie_ticket.is_some());

        let record = f
            .store
            .find_auth_token(1, &hash_secret(&issued.access_token))
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_logged_in);
        assert_eq!(Some(record.id), ticket.identity.auth_token_id());

        let response = issued.response();
        assert_eq!(response.token_type, "bearer");
        assert_eq!(response.expires_in, 20 * 60);
        assert_eq!(response.user_name, "alice");
        assert!(response.issued.ends_with("GMT"));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized_invalid_grant() {
        let f = fixture();
        let err = f
            .grants
            .process(
                web(),
                &TokenRequest::password("alice", "wrong"),
                &RequestOrigin::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_GRANT);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disabled_user_is_forbidden() {
        let f = fixture();
        f.store.set_user_enabled(1, false);
        let err = sign_in(&f, "alice").await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn client_validation_failures() {
        let f = fixture();
        let request = TokenRequest::password("alice", "correct");
        let origin = RequestOrigin::default();

        let missing = f
            .grants
            .process(ClientCredentials::default(), &request, &origin)
            .await
            .unwrap_err();
        assert_eq!(missing.error, GrantError::INVALID_CLIENT);

        let unknown = ClientCredentials {
            client_id: Some("mobile".to_string()),
            client_secret: None,
        };
        let err = f.grants.process(unknown, &request, &origin).await.unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_CLIENT);

        let no_secret = ClientCredentials {
            client_id: Some("native".to_string()),
            client_secret: None,
        };
        let err = f.grants.process(no_secret, &request, &origin).await.unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_CLIENT);

        let bad_secret = ClientCredentials {
            client_id: Some("native".to_string()),
            client_secret: Some("nope".to_string()),
        };
        let err = f.grants.process(bad_secret, &request, &origin).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let good = ClientCredentials {
            client_id: Some("native".to_string()),
            client_secret: Some("s3cret".to_string()),
        };
        let issued = f.grants.process(good, &request, &origin).await.unwrap();
        assert!(issued.refresh_token.is_none());
    }

    #[tokio::test]
    async fn inactive_client_is_rejected() {
        let f = fixture();
        let mut web = client("web", ApplicationType::JavaScript, "", 60);
        web.active = false;
        f.store.insert_client(web);

        let err = sign_in(&f, "alice").await.unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_CLIENT);
    }

    #[test]
    fn basic_header_wins_over_form() {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("native:s3cret");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap(),
        );
        let mut form = TokenRequest::password("alice", "correct");
        form.client_id = Some("web".to_string());

        let creds = ClientCredentials::from_request(&headers, &form);
        assert_eq!(creds.client_id.as_deref(), Some("native"));
        assert_eq!(creds.client_secret.as_deref(), Some("s3cret"));

        let creds = ClientCredentials::from_request(&HeaderMap::new(), &form);
        assert_eq!(creds.client_id.as_deref(), Some("web"));
        assert_eq!(creds.client_secret, None);
    }

    #[tokio::test]
    async fn unsupported_and_missing_grant_types() {
        let f = fixture();
        let mut request = TokenRequest::password("alice", "correct");
        request.grant_type = "client_credentials".to_string();
        let err = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::UNSUPPORTED_GRANT_TYPE);

        request.grant_type = String::new();
        let err = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn live_session_rejected_without_force_login() {
        let f = fixture();
        let first = f
            .grants
            .process(
                web(),
                &TokenRequest::password("alice", "correct"),
                &RequestOrigin::default(),
            )
            .await;
        assert!(first.is_ok());

        let second = f
            .grants
            .process(
                web(),
                &TokenRequest::password("alice", "correct"),
                &RequestOrigin::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(second.error, GrantError::SESSION_REJECTED);
        assert_eq!(second.status, StatusCode::CONFLICT);

        let forced = sign_in(&f, "alice").await.unwrap();
        assert_eq!(f.store.logged_in_session_count(1).unwrap(), 1);
        let record = f
            .store
            .find_auth_token(1, &hash_secret(&forced.access_token))
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_logged_in);
    }

    #[tokio::test]
    async fn multiple_instances_keep_both_sessions() {
        let f = fixture_with(options(true));
        sign_in(&f, "alice").await.unwrap();
        sign_in(&f, "alice").await.unwrap();
        assert_eq!(f.store.logged_in_session_count(1).unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_grants_leave_one_live_session() {
        let f = Arc::new(fixture());
        let mut handles = Vec::new();
        for _ in 0..6 {
            let f = f.clone();
            handles.push(tokio::spawn(async move { sign_in(&f, "alice").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert!(f.store.logged_in_session_count(1).unwrap() <= 1);
    }

    #[tokio::test]
    async fn refresh_token_is_single_use() {
        let f = fixture();
        let issued = sign_in(&f, "alice").await.unwrap();
        let refresh = issued.refresh_token.clone().unwrap();

        let request = TokenRequest {
            grant_type: "refresh_token".to_string(),
            refresh_token: Some(refresh.clone()),
            ..Default::default()
        };
        let refreshed = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap();
        assert_ne!(refreshed.access_token, issued.access_token);
        assert_eq!(
            refreshed.ticket.identity.auth_token_id(),
            issued.ticket.identity.auth_token_id()
        );
        assert!(refreshed.refresh_token.is_some());

        let again = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(again.error, GrantError::INVALID_GRANT);
        assert_eq!(again.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_after_logout_is_rejected() {
        let f = fixture();
        let issued = sign_in(&f, "alice").await.unwrap();
        let session = issued.ticket.identity.auth_token_id().unwrap();
        f.store.logout(1, session).await.unwrap();

        let request = TokenRequest {
            grant_type: "refresh_token".to_string(),
            refresh_token: issued.refresh_token.clone(),
            ..Default::default()
        };
        let err = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_GRANT);
    }

    #[tokio::test]
    async fn refresh_by_other_client_is_invalid_client() {
        let f = fixture();
        let issued = sign_in(&f, "alice").await.unwrap();

        let request = TokenRequest {
            grant_type: "refresh_token".to_string(),
            refresh_token: issued.refresh_token.clone(),
            ..Default::default()
        };
        let native = ClientCredentials {
            client_id: Some("native".to_string()),
            client_secret: Some("s3cret".to_string()),
        };
        let err = f
            .grants
            .process(native, &request, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_CLIENT);
    }

    #[tokio::test]
    async fn impersonation_uses_target_identity() {
        let f = fixture();
        let admin = sign_in(&f, "alice").await.unwrap();

        let request = TokenRequest {
            grant_type: "password".to_string(),
            impersonate: true,
            impersonating_user_id: Some("2".to_string()),
            random: f.signer.mint(NoncePurpose::Impersonate, 2, 1),
            ..Default::default()
        };
        let issued = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(issued.ticket.identity.name(), Some("bob"));
        assert_eq!(issued.ticket.identity.impersonating_user_id(), Some(1));
        assert!(issued.ticket.identity.is_impersonated());

        let alice_record = f
            .store
            .find_auth_token(1, &hash_secret(&admin.access_token))
            .await
            .unwrap()
            .unwrap();
        assert!(alice_record.is_logged_in);
    }

    #[tokio::test]
    async fn tampered_impersonation_target_is_rejected() {
        let f = fixture();
        let request = TokenRequest {
            grant_type: "password".to_string(),
            impersonate: true,
            impersonating_user_id: Some("1".to_string()),
            random: f.signer.mint(NoncePurpose::Impersonate, 2, 1),
            ..Default::default()
        };
        let err = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_GRANT);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn revoke_restores_original_user() {
        let f = fixture();
        let request = TokenRequest {
            grant_type: "password".to_string(),
            revoke_impersonation: true,
            user_id: Some("1".to_string()),
            impersonating_user_id: Some("2".to_string()),
            random: f.signer.mint(NoncePurpose::Revoke, 2, 1),
            ..Default::default()
        };
        let issued = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(issued.ticket.identity.name(), Some("alice"));
        assert!(!issued.ticket.identity.is_impersonated());

        let forged = TokenRequest {
            user_id: Some("2".to_string()),
            ..request
        };
        let err = f
            .grants
            .process(web(), &forged, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_GRANT);
    }

    #[tokio::test]
    async fn client_expiry_override_applies() {
        let f = fixture();
        let mut web = client("web", ApplicationType::JavaScript, "", 0);
        web.access_token_expiry_minutes = Some(5);
        f.store.insert_client(web);

        let issued = sign_in(&f, "alice").await.unwrap();
        assert_eq!(issued.response().expires_in, 5 * 60);
        assert!(issued.response().refresh_token.is_none());
    }

    #[tokio::test]
    async fn changed_password_blocks_refresh() {
        let f = fixture();
        let issued = sign_in(&f, "alice").await.unwrap();
        f.store
            .update_password(1, PasswordHashString::new("other".to_string()))
            .await
            .unwrap();

        let request = TokenRequest {
            grant_type: "refresh_token".to_string(),
            refresh_token: issued.refresh_token.clone(),
            ..Default::default()
        };
        let err = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_GRANT);
    }

    #[tokio::test]
    async fn out_of_range_client_expiry_is_an_error_not_a_panic() {
        let f = fixture();
        for minutes in [i64::MAX / 1000, MAX_TOKEN_LIFETIME_MINUTES + 1] {
            let mut web = client("web", ApplicationType::JavaScript, "", 60);
            web.access_token_expiry_minutes = Some(minutes);
            f.store.insert_client(web);

            let err = sign_in(&f, "alice").await.unwrap_err();
            assert_eq!(err.error, GrantError::INVALID_CLIENT);
            assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn out_of_range_refresh_lifetime_is_a_server_error() {
        let f = fixture();
        f.store
            .insert_client(client("web", ApplicationType::JavaScript, "", i64::MAX / 1000));

        let err = sign_in(&f, "alice").await.unwrap_err();
        assert_eq!(err.error, GrantError::SERVER_ERROR);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn options_reject_out_of_range_expiry() {
        let mut config = crate::config::GatewayConfig {
            common: service_core::config::Config::default(),
            environment: crate::config::Environment::Dev,
            service_name: "auth-gateway".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            auth: crate::config::AuthOptions::default(),
            tokens: crate::config::TokenOptions {
                ticket_secret: "0123456789abcdef0123456789abcdef".to_string(),
                impersonation_secret: "imp".to_string(),
                access_token_expiry_minutes: 20,
                impersonation_nonce_seconds: 60,
                default_client_id: "web".to_string(),
                store_timeout_ms: 1000,
            },
            seed_path: None,
            allowed_origins: Vec::new(),
            suppress_exception_detail: true,
        };
        assert_eq!(
            GrantOptions::from_config(&config).unwrap().access_token_expiry,
            ChronoDuration::minutes(20)
        );
        config.tokens.access_token_expiry_minutes = i64::MAX;
        assert!(GrantOptions::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn browser_origin_must_match_client_registration() {
        let f = fixture();
        let mut registered = client("web", ApplicationType::JavaScript, "", 60);
        registered.allowed_origin = "https://app.example.com".to_string();
        f.store.insert_client(registered);

        let mut request = TokenRequest::password("alice", "correct");
        request.force_login = true;

        let foreign = RequestOrigin {
            web_origin: Some("https://evil.example.net".to_string()),
            ..Default::default()
        };
        let err = f.grants.process(web(), &request, &foreign).await.unwrap_err();
        assert_eq!(err.error, GrantError::INVALID_CLIENT);

        let own = RequestOrigin {
            web_origin: Some("https://app.example.com/".to_string()),
            ..Default::default()
        };
        let issued = f.grants.process(web(), &request, &own).await.unwrap();
        assert_eq!(issued.allowed_origin.as_deref(), Some("https://app.example.com"));

        let native_tool = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(native_tool.allowed_origin.as_deref(), Some("https://app.example.com"));
    }

    #[tokio::test]
    async fn impersonation_session_does_not_lock_out_the_target() {
        let f = fixture();
        sign_in(&f, "alice").await.unwrap();

        let request = TokenRequest {
            grant_type: "password".to_string(),
            impersonate: true,
            impersonating_user_id: Some("2".to_string()),
            random: f.signer.mint(NoncePurpose::Impersonate, 2, 1),
            ..Default::default()
        };
        let impersonation = f
            .grants
            .process(web(), &request, &RequestOrigin::default())
            .await
            .unwrap();

        let own = f
            .grants
            .process(
                web(),
                &TokenRequest::password("bob", "correct"),
                &RequestOrigin::default(),
            )
            .await
            .unwrap();
        assert!(!own.ticket.identity.is_impersonated());

        let session = impersonation.ticket.identity.auth_token_id().unwrap();
        let record = f.store.find_auth_token_by_id(session).await.unwrap().unwrap();
        assert!(record.is_logged_in);
        assert_eq!(record.impersonating_user_id, Some(1));
    }
}
