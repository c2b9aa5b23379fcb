use axum::{
    extract::{rejection::FormRejection, State},
    http::{header, HeaderMap, HeaderValue},
    Form, Json,
};

use crate::{
    dtos::token::{OAuthErrorResponse, TokenRequest, TokenResponse},
    middleware::RequestMeta,
    services::{ClientCredentials, GrantError, IssuedToken},
    AppState,
};

/// `Access-Control-Allow-Origin` for the origin the client is registered for.
fn allow_origin(issued: &IssuedToken) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(value) = issued
        .allowed_origin
        .as_deref()
        .and_then(|origin| HeaderValue::from_str(origin).ok())
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers
}

/// OAuth2 token endpoint
#[utoipa::path(
    post,
    path = "/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Malformed request or invalid refresh token", body = OAuthErrorResponse),
        (status = 401, description = "Invalid client, client origin or credentials", body = OAuthErrorResponse),
        (status = 403, description = "User disabled", body = OAuthErrorResponse),
        (status = 409, description = "User already has a live session", body = OAuthErrorResponse),
        (status = 502, description = "Credential store timed out", body = OAuthErrorResponse)
    ),
    tag = "OAuth"
)]
pub async fn token(
    State(state): State<AppState>,
    meta: RequestMeta,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<(HeaderMap, Json<TokenResponse>), GrantError> {
    let Form(request) = form.map_err(|e| GrantError::invalid_request(e.body_text()))?;
    let credentials = ClientCredentials::from_request(&meta.headers, &request);

    let issued = state
        .grants
        .process(credentials, &request, &meta.origin())
        .await?;
    Ok((allow_origin(&issued), Json(issued.response())))
}
