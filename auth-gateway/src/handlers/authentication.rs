use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use service_core::error::AppError;
use time::OffsetDateTime;

use crate::{
    config::Environment,
    dtos::{
        authentication::{
            ChangePasswordRequest, ClaimsResponse, ImpersonateRequest, LoginRequest,
        },
        token::{OAuthErrorResponse, TokenRequest, TokenResponse},
        MessageResponse,
    },
    middleware::{authorization_credentials, new_csrf_token, AuthUser, RequestMeta},
    services::{bounded, ClientCredentials, GrantError, IssuedToken, NoncePurpose, ServiceError},
    ticket::Purpose,
    utils::{hash_password, verify_password, Password, ValidatedJson},
    AppState,
};

/// Add the auth cookie and, with CSRF protection on, a fresh CSRF cookie.
fn sign_in_cookies(state: &AppState, jar: CookieJar, issued: &IssuedToken) -> CookieJar {
    let Some(ticket) = issued.cookie_ticket.clone() else {
        return jar;
    };
    let secure = state.config.environment == Environment::Prod;
    let properties = &issued.ticket.properties;

    let mut auth = Cookie::build((state.config.auth.auth_cookie_name.clone(), ticket))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build();
    if properties.is_persistent {
        if let Some(expires) = properties.expires_utc {
            auth.set_expires(OffsetDateTime::from_unix_timestamp(expires.timestamp()).ok());
        }
    }
    let mut jar = jar.add(auth);

    if state.config.auth.csrf_enabled {
        jar = jar.add(
            Cookie::build((state.config.auth.csrf_cookie_name.clone(), new_csrf_token()))
                .path("/")
                .http_only(false)
                .secure(secure)
                .same_site(SameSite::Lax)
                .build(),
        );
    }
    jar
}

fn mint_nonce(
    state: &AppState,
    purpose: NoncePurpose,
    target: i64,
    acting: i64,
) -> Result<String, ServiceError> {
    state
        .signer
        .mint(purpose, target, acting)
        .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Impersonation nonce out of range")))
}

fn sign_out_cookies(state: &AppState, jar: CookieJar) -> CookieJar {
    jar.remove(
        Cookie::build((state.config.auth.auth_cookie_name.clone(), ""))
            .path("/")
            .build(),
    )
    .remove(
        Cookie::build((state.config.auth.csrf_cookie_name.clone(), ""))
            .path("/")
            .build(),
    )
}

/// Sign in with username and password
#[utoipa::path(
    post,
    path = "/api/Authentication/Login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = OAuthErrorResponse),
        (status = 403, description = "User disabled", body = OAuthErrorResponse),
        (status = 409, description = "User already has a live session", body = OAuthErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), GrantError> {
    let client_id = req
        .client_id
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| state.config.tokens.default_client_id.clone());

    let mut request = TokenRequest::password(&req.username, &req.password);
    request.client_id = Some(client_id.clone());
    request.force_login = req.force_login;
    request.remember_me = req.remember_me;

    let credentials = ClientCredentials {
        client_id: Some(client_id),
        client_secret: None,
    };
    let issued = state
        .grants
        .process(credentials, &request, &meta.origin())
        .await?;

    let jar = sign_in_cookies(&state, jar, &issued);
    Ok((jar, Json(issued.response())))
}

/// End the caller's session
///
/// Always succeeds. The presented token or cookie is only decrypted, never
/// validated, so an expired or already logged-out session can still be
/// cleared.
#[utoipa::path(
    put,
    path = "/api/Authentication/Logout",
    responses(
        (status = 200, description = "Signed out", body = MessageResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    let auth = &state.config.auth;
    let ticket = authorization_credentials(&headers, &auth.header_scheme)
        .and_then(|token| state.protector.unprotect(token, Purpose::AccessToken))
        .or_else(|| {
            jar.get(&auth.auth_cookie_name)
                .and_then(|c| state.protector.unprotect(c.value(), Purpose::Cookie))
        });

    if let Some(ticket) = ticket {
        if let (Some(user_id), Some(session)) =
            (ticket.identity.user_id(), ticket.identity.auth_token_id())
        {
            let existed = bounded(
                state.config.tokens.store_timeout(),
                state.store.logout(user_id, session),
            )
            .await?;
            tracing::info!(user_id, auth_token_id = %session, existed, "Session logged out");
        }
    }

    Ok((
        sign_out_cookies(&state, jar),
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

/// Start impersonating another user
#[utoipa::path(
    post,
    path = "/api/Authentication/ImpersonateUser",
    request_body = ImpersonateRequest,
    responses(
        (status = 200, description = "Token for the impersonated user", body = TokenResponse),
        (status = 400, description = "Invalid impersonation request", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = MessageResponse),
        (status = 403, description = "Not allowed to impersonate", body = MessageResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn impersonate_user(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ImpersonateRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), AppError> {
    let identity = user.principal.identity();
    if identity.is_impersonated() {
        return Err(ServiceError::BadRequest("Already impersonating a user".to_string()).into());
    }
    let acting = identity
        .user_id()
        .ok_or_else(|| ServiceError::BadRequest("Caller has no user id".to_string()))?;
    if acting == req.user_id {
        return Err(ServiceError::BadRequest("Cannot impersonate yourself".to_string()).into());
    }

    let client_id = identity
        .auth_client_id()
        .map(str::to_string)
        .unwrap_or_else(|| state.config.tokens.default_client_id.clone());
    let request = TokenRequest {
        grant_type: "password".to_string(),
        client_id: Some(client_id.clone()),
        impersonate: true,
        impersonating_user_id: Some(req.user_id.to_string()),
        random: Some(mint_nonce(&state, NoncePurpose::Impersonate, req.user_id, acting)?),
        ..Default::default()
    };
    let credentials = ClientCredentials {
        client_id: Some(client_id),
        client_secret: None,
    };

    let issued = state
        .grants
        .process(credentials, &request, &meta.origin())
        .await
        .map_err(ServiceError::Grant)?;

    tracing::info!(acting_user_id = acting, target_user_id = req.user_id, "Impersonation started");
    let jar = sign_in_cookies(&state, jar, &issued);
    Ok((jar, Json(issued.response())))
}

/// Stop impersonating and return to the original user
#[utoipa::path(
    post,
    path = "/api/Authentication/RevokeImpersonation",
    responses(
        (status = 200, description = "Token for the original user", body = TokenResponse),
        (status = 400, description = "Caller is not impersonating", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = MessageResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn revoke_impersonation(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    user: AuthUser,
) -> Result<(CookieJar, Json<TokenResponse>), AppError> {
    let identity = user.principal.identity();
    let (Some(original), Some(impersonated)) = (identity.impersonating_user_id(), identity.user_id())
    else {
        return Err(ServiceError::BadRequest("Not impersonating a user".to_string()).into());
    };

    let client_id = identity
        .auth_client_id()
        .map(str::to_string)
        .unwrap_or_else(|| state.config.tokens.default_client_id.clone());
    let request = TokenRequest {
        grant_type: "password".to_string(),
        client_id: Some(client_id.clone()),
        revoke_impersonation: true,
        user_id: Some(original.to_string()),
        impersonating_user_id: Some(impersonated.to_string()),
        random: Some(mint_nonce(&state, NoncePurpose::Revoke, impersonated, original)?),
        ..Default::default()
    };
    let credentials = ClientCredentials {
        client_id: Some(client_id),
        client_secret: None,
    };

    let issued = state
        .grants
        .process(credentials, &request, &meta.origin())
        .await
        .map_err(ServiceError::Grant)?;

    // The impersonation session ends only once the original user holds a
    // fresh token.
    if let Some(session) = identity.auth_token_id() {
        bounded(
            state.config.tokens.store_timeout(),
            state.store.logout(impersonated, session),
        )
        .await?;
    }

    tracing::info!(user_id = original, impersonated, "Impersonation ended");
    let jar = sign_in_cookies(&state, jar, &issued);
    Ok((jar, Json(issued.response())))
}

/// Change the caller's password
///
/// Every outstanding token for the user stops validating when
/// password-change validation is on.
#[utoipa::path(
    post,
    path = "/api/Authentication/ChangePassword",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Current password is wrong or new one is invalid", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = MessageResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let identity = user.principal.identity();
    if identity.is_impersonated() {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Password cannot be changed while impersonating"
        )));
    }
    let username = identity
        .name()
        .ok_or_else(|| ServiceError::BadRequest("Caller has no user name".to_string()))?;
    let timeout = state.config.tokens.store_timeout();

    let account = bounded(timeout, state.store.find_account_by_username(username))
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    let current = Password::new(req.current_password);
    let stored = account.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&current, &stored))
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Password check failed: {}", e)))?;
    if !matches {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Current password is incorrect"
        )));
    }

    let new_password = Password::new(req.new_password);
    let new_hash = tokio::task::spawn_blocking(move || hash_password(&new_password))
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Password hashing failed: {}", e)))?
        .map_err(AppError::InternalError)?;

    let stamp = bounded(
        timeout,
        state.store.update_password(account.identity.user_id, new_hash),
    )
    .await?;
    tracing::info!(user_id = account.identity.user_id, stamp, "Password changed");

    Ok(Json(MessageResponse::new("Password changed")))
}

/// Claims of the authenticated caller
#[utoipa::path(
    get,
    path = "/api/Authentication/claims",
    responses(
        (status = 200, description = "Caller's claims", body = ClaimsResponse),
        (status = 401, description = "Not authenticated", body = MessageResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn claims(user: AuthUser) -> Json<ClaimsResponse> {
    let identity = user.principal.identity();
    let expires_in = user
        .context
        .expires_utc
        .map(|expires| (expires - Utc::now()).num_seconds().max(0))
        .unwrap_or(0);
    let username = identity.name().unwrap_or_default().to_string();

    Json(ClaimsResponse {
        name: username.clone(),
        authentication_type: identity.authentication_type.clone(),
        username,
        security_id: identity
            .security_id()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        roles: identity.roles().into_iter().collect(),
        auth_token_id: identity
            .auth_token_id()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        expires_in,
        auth_client: identity.auth_client_id().unwrap_or_default().to_string(),
        full_name: identity.full_name().unwrap_or_default().to_string(),
        is_impersonated: identity.is_impersonated(),
        impersonating_user_id: identity.impersonating_user_id(),
        culture: identity.culture().unwrap_or_default().to_string(),
    })
}
