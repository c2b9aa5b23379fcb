//! Gateway services: token issuance, validation and authorization.

pub mod authorization;
pub mod error;
pub mod grant;
pub mod impersonation;
pub mod validator;

pub use authorization::AuthorizationEngine;
pub use error::{AuthFailure, GrantError, ServiceError, ACL_DENIED_MESSAGE};
pub use grant::{
    ClientCredentials, GrantOptions, GrantProcessor, IssuedToken, RequestOrigin, ValidatedClient,
};
pub use impersonation::{ImpersonationSigner, NoncePurpose};
pub use validator::{EnabledUserHook, TokenValidator, ValidationHook, ValidatorOptions};

use std::future::Future;
use std::time::Duration;

use crate::store::StoreError;

/// Run a credential store call under `limit`.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => {
            tracing::error!(timeout_ms = limit.as_millis() as u64, "Credential store call timed out");
            Err(ServiceError::Timeout)
        }
    }
}
