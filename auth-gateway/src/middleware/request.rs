use axum::{
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{header, request::Parts, Extensions, HeaderMap, Method, Uri},
};
use axum_extra::extract::cookie::CookieJar;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use super::AllowAnonymous;
use crate::{services::RequestOrigin, AppState};

/// What the authentication strategies get to see of a request.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
    pub query: HashMap<String, String>,
    /// Endpoint is marked [`AllowAnonymous`].
    pub allow_anonymous: bool,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// `X-Forwarded-For` is consulted only when `trust_forwarded_for` is set;
    /// otherwise the peer address is used.
    pub fn from_request(req: &Request, trust_forwarded_for: bool) -> Self {
        Self::build(
            req.method(),
            req.uri(),
            req.headers(),
            req.extensions(),
            trust_forwarded_for,
        )
    }

    pub fn from_parts(parts: &Parts, trust_forwarded_for: bool) -> Self {
        Self::build(
            &parts.method,
            &parts.uri,
            &parts.headers,
            &parts.extensions,
            trust_forwarded_for,
        )
    }

    fn build(
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        extensions: &Extensions,
        trust_forwarded_for: bool,
    ) -> Self {
        let query = uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<HashMap<String, String>>(q).ok())
            .unwrap_or_default();
        let forwarded = trust_forwarded_for
            .then(|| {
                headers
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .flatten();
        let client_ip = forwarded.or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            method: method.clone(),
            path: uri.path().to_string(),
            cookies: CookieJar::from_headers(headers),
            headers: headers.clone(),
            query,
            allow_anonymous: extensions.get::<AllowAnonymous>().is_some(),
            client_ip,
            user_agent,
        }
    }

    /// Where a grant request came from, as recorded on the issued session.
    pub fn origin(&self) -> RequestOrigin {
        RequestOrigin {
            client_ip: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
            web_origin: self.header(header::ORIGIN.as_str()).map(str::to_string),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get(name)
            .map(|c| c.value())
            .filter(|v| !v.is_empty())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Credentials following `scheme` in the `Authorization` header, matched
    /// case-insensitively.
    pub fn authorization(&self, scheme: &str) -> Option<&str> {
        authorization_credentials(&self.headers, scheme)
    }

    /// Methods exempt from the double-submit check.
    pub fn is_safe_method(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(RequestMeta::from_parts(
            parts,
            state.config.auth.trust_forwarded_for,
        ))
    }
}

pub fn authorization_credentials<'a>(headers: &'a HeaderMap, scheme: &str) -> Option<&'a str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (given, credentials) = value.trim().split_once(' ')?;
    if !given.eq_ignore_ascii_case(scheme) {
        return None;
    }
    Some(credentials.trim()).filter(|c| !c.is_empty())
}
