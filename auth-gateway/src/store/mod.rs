//! Persistence boundary for users, clients, sessions, refresh tokens and
//! access rules.

mod memory;
mod seed;

pub use memory::MemoryStore;
pub use seed::{load_seed, SeedClient, SeedFile, SeedResource, SeedRule, SeedUser};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AccessFlags, AuthClient, Permission, RefreshToken, Resource, UserAccount, UserAuthToken,
    UserIdentity,
};
use crate::utils::PasswordHashString;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),

    #[error("Invalid seed data: {0}")]
    InvalidSeed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Credential and session persistence.
///
/// Implementations must make `generate_auth_token`/`save_auth_token` and
/// `redeem_refresh_token` atomic with respect to concurrent callers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_client(&self, client_id: &str) -> Result<Option<AuthClient>, StoreError>;

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, StoreError>;

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StoreError>;

    /// Live password-change stamp, `None` for an unknown user.
    async fn password_timestamp(&self, user_id: i64) -> Result<Option<i64>, StoreError>;

    /// Store a new password hash and bump the stamp. Returns the new stamp.
    async fn update_password(
        &self,
        user_id: i64,
        new_hash: PasswordHashString,
    ) -> Result<i64, StoreError>;

    /// Whether the user holds a live session of their own. Sessions opened by
    /// an impersonator are not counted.
    async fn has_live_session(&self, user_id: i64) -> Result<bool, StoreError>;

    /// Allocate a new session id for `user_id`. Unless `allow_multiple`, the
    /// new id becomes the user's only current session and every other session
    /// is logged out in the same step.
    async fn generate_auth_token(
        &self,
        user_id: i64,
        allow_multiple: bool,
    ) -> Result<Uuid, StoreError>;

    /// Insert or update a session record. A record superseded by a newer
    /// session, or already logged out, is stored logged out.
    async fn save_auth_token(&self, record: UserAuthToken) -> Result<(), StoreError>;

    async fn find_auth_token(
        &self,
        user_id: i64,
        access_token_hash: &str,
    ) -> Result<Option<UserAuthToken>, StoreError>;

    async fn find_auth_token_by_id(&self, id: Uuid) -> Result<Option<UserAuthToken>, StoreError>;

    /// Mark a session logged out. Idempotent; returns whether it existed.
    async fn logout(&self, user_id: i64, auth_token_id: Uuid) -> Result<bool, StoreError>;

    /// Replaces any existing refresh token for the same subject and client.
    async fn add_refresh_token(&self, token: RefreshToken) -> Result<(), StoreError>;

    /// Take-and-delete. Only one concurrent caller receives the record.
    async fn redeem_refresh_token(&self, id_hash: &str)
        -> Result<Option<RefreshToken>, StoreError>;

    async fn resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn permissions(&self) -> Result<Vec<Permission>, StoreError>;

    async fn check_authorization(
        &self,
        security_ids: &[Uuid],
        resource_id: Uuid,
        permission_code: i32,
    ) -> Result<AccessFlags, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
