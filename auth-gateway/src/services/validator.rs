use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::{bounded, AuthFailure, ServiceError};
use crate::config::AuthOptions;
use crate::store::CredentialStore;
use crate::ticket::{Purpose, Ticket, TicketProtector};
use crate::utils::hash_secret;

/// Final say on a ticket that decrypted and has not expired.
#[async_trait]
pub trait ValidationHook: Send + Sync {
    async fn validate(&self, ticket: &Ticket) -> Result<bool, ServiceError>;
}

/// Accepts tickets whose user still exists and is enabled.
pub struct EnabledUserHook {
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
}

impl EnabledUserHook {
    pub fn new(store: Arc<dyn CredentialStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl ValidationHook for EnabledUserHook {
    async fn validate(&self, ticket: &Ticket) -> Result<bool, ServiceError> {
        let Some(user_id) = ticket.identity.user_id() else {
            return Ok(false);
        };
        let user = bounded(self.timeout, self.store.find_user_by_id(user_id)).await?;
        Ok(matches!(user, Some(u) if u.enabled))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidatorOptions {
    pub db_token_validation: bool,
    pub password_change_validation: bool,
}

impl From<&AuthOptions> for ValidatorOptions {
    fn from(opts: &AuthOptions) -> Self {
        Self {
            db_token_validation: opts.db_token_validation,
            password_change_validation: opts.password_change_validation,
        }
    }
}

/// Turns a protected access token or cookie ticket back into a trusted ticket.
///
/// Checks run in order and stop at the first failure: decrypt, expiry,
/// validation hook, password stamp, stored session, issuing client.
pub struct TokenValidator {
    store: Arc<dyn CredentialStore>,
    protector: Arc<TicketProtector>,
    hook: Arc<dyn ValidationHook>,
    options: ValidatorOptions,
    timeout: Duration,
}

impl TokenValidator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        protector: Arc<TicketProtector>,
        hook: Arc<dyn ValidationHook>,
        options: ValidatorOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            protector,
            hook,
            options,
            timeout,
        }
    }

    pub async fn validate(&self, token: &str, purpose: Purpose) -> Result<Ticket, ServiceError> {
        self.validate_at(token, purpose, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        token: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<Ticket, ServiceError> {
        let ticket = self
            .protector
            .unprotect(token, purpose)
            .ok_or(AuthFailure::InvalidBearerToken)?;

        if ticket.properties.is_expired_at(now) {
            return Err(AuthFailure::TokenExpired.into());
        }

        if !self.hook.validate(&ticket).await? {
            return Err(AuthFailure::InvalidBearerToken.into());
        }

        let user_id = ticket
            .identity
            .user_id()
            .ok_or(AuthFailure::InvalidBearerToken)?;

        if self.options.password_change_validation {
            let live = bounded(self.timeout, self.store.password_timestamp(user_id)).await?;
            if live.is_none() || live != ticket.identity.password_timestamp() {
                tracing::info!(user_id, "Token issued before the last password change");
                return Err(AuthFailure::AlteredCredential.into());
            }
        }

        if self.options.db_token_validation {
            let record = match purpose {
                Purpose::Cookie => {
                    let id = ticket
                        .identity
                        .auth_token_id()
                        .ok_or(AuthFailure::UserSessionExpired)?;
                    bounded(self.timeout, self.store.find_auth_token_by_id(id))
                        .await?
                        .filter(|r| r.user_id == user_id)
                }
                _ => {
                    bounded(
                        self.timeout,
                        self.store.find_auth_token(user_id, &hash_secret(token)),
                    )
                    .await?
                }
            };

            match record {
                Some(record) if record.is_live(now) => {}
                _ => return Err(AuthFailure::UserSessionExpired.into()),
            }

            if let Some(client_id) = ticket.properties.client_id() {
                let client = bounded(self.timeout, self.store.find_client(client_id)).await?;
                if !matches!(client, Some(c) if c.active) {
                    tracing::info!(client_id, "Token issued to a removed or inactive client");
                    return Err(AuthFailure::InvalidClient.into());
                }
            }
        }

        Ok(ticket)
    }
}
