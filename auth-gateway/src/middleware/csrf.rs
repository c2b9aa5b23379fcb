use rand::RngCore;

use super::RequestMeta;
use crate::services::AuthFailure;
use crate::utils::constant_time_eq;

/// Double-submit check: the CSRF cookie must be echoed in a request header.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    cookie_name: String,
    header_name: String,
}

impl CsrfGuard {
    pub fn new(cookie_name: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            header_name: header_name.into(),
        }
    }

    /// Safe methods pass. Otherwise both values must be present and equal.
    pub fn verify(&self, meta: &RequestMeta) -> Result<(), AuthFailure> {
        if meta.is_safe_method() {
            return Ok(());
        }

        let cookie = meta.cookie(&self.cookie_name);
        let header = meta.header(&self.header_name).filter(|h| !h.is_empty());
        match (cookie, header) {
            (Some(c), Some(h)) if constant_time_eq(c.as_bytes(), h.as_bytes()) => Ok(()),
            _ => {
                tracing::warn!(path = %meta.path, "CSRF token mismatch");
                Err(AuthFailure::CsrfMismatch)
            }
        }
    }
}

/// Fresh random token for the CSRF cookie.
pub fn new_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
