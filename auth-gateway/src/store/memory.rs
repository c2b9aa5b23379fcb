use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{CredentialStore, StoreError};
use crate::models::{
    new_password_timestamp, AccessFlags, AccessRule, AuthClient, Permission, RefreshToken,
    Resource, RuleEffect, UserAccount, UserAuthToken, UserIdentity,
};
use crate::utils::PasswordHashString;

#[derive(Default)]
struct SessionTable {
    records: HashMap<Uuid, UserAuthToken>,
    /// Current session per user in single-session mode. Impersonation
    /// sessions sit outside this slot.
    current: HashMap<i64, Uuid>,
}

/// In-process credential store.
///
/// Users, clients, refresh tokens and the access catalog live in concurrent
/// maps. Sessions live behind one mutex so that session generation and the
/// supersede-others step happen as a single critical section.
#[derive(Default)]
pub struct MemoryStore {
    pub(super) users: DashMap<i64, UserAccount>,
    usernames: DashMap<String, i64>,
    pub(super) clients: DashMap<String, AuthClient>,
    sessions: Mutex<SessionTable>,
    refresh_tokens: DashMap<String, RefreshToken>,
    pub(super) resources: DashMap<Uuid, Resource>,
    pub(super) permissions: DashMap<i32, Permission>,
    rules: DashMap<(Uuid, i32), Vec<AccessRule>>,
}

impl MemoryStore {
    /// Empty store with the built-in permission set.
    pub fn new() -> Self {
        let store = Self::default();
        for permission in Permission::builtin() {
            store.insert_permission(permission);
        }
        store
    }

    pub fn insert_user(
        &self,
        identity: UserIdentity,
        password_hash: PasswordHashString,
    ) -> Result<(), StoreError> {
        let key = identity.username.to_lowercase();
        if let Some(existing) = self.usernames.get(&key) {
            if *existing != identity.user_id {
                return Err(StoreError::InvalidSeed(format!(
                    "username {} already taken",
                    identity.username
                )));
            }
        }
        self.usernames.insert(key, identity.user_id);
        self.users.insert(
            identity.user_id,
            UserAccount {
                identity,
                password_hash,
            },
        );
        Ok(())
    }

    pub fn set_user_enabled(&self, user_id: i64, enabled: bool) {
        if let Some(mut account) = self.users.get_mut(&user_id) {
            account.identity.enabled = enabled;
        }
    }

    pub fn insert_client(&self, client: AuthClient) {
        self.clients.insert(client.client_id.clone(), client);
    }

    pub fn insert_resource(&self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    pub fn insert_permission(&self, permission: Permission) {
        self.permissions.insert(permission.code, permission);
    }

    pub fn insert_rule(&self, rule: AccessRule) {
        self.rules
            .entry((rule.resource_id, rule.permission_code))
            .or_default()
            .push(rule);
    }

    /// Number of sessions currently logged in for `user_id`, expiry ignored.
    pub fn logged_in_session_count(&self, user_id: i64) -> Result<usize, StoreError> {
        let table = self.lock_sessions()?;
        Ok(table
            .records
            .values()
            .filter(|r| r.user_id == user_id && r.is_logged_in && !r.is_expired)
            .count())
    }

    pub fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.len()
    }

    fn lock_sessions(&self) -> Result<std::sync::MutexGuard<'_, SessionTable>, StoreError> {
        self.sessions
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_client(&self, client_id: &str) -> Result<Option<AuthClient>, StoreError> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, StoreError> {
        let Some(user_id) = self.usernames.get(&username.to_lowercase()).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.users.get(&user_id).map(|a| a.clone()))
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.users.get(&user_id).map(|a| a.identity.clone()))
    }

    async fn password_timestamp(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self
            .users
            .get(&user_id)
            .map(|a| a.identity.password_timestamp))
    }

    async fn update_password(
        &self,
        user_id: i64,
        new_hash: PasswordHashString,
    ) -> Result<i64, StoreError> {
        let mut account = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("unknown user {}", user_id)))?;

        let stamp = new_password_timestamp(Some(account.identity.password_timestamp));
        account.password_hash = new_hash;
        account.identity.password_timestamp = stamp;
        Ok(stamp)
    }

    async fn has_live_session(&self, user_id: i64) -> Result<bool, StoreError> {
        let now = Utc::now();
        let table = self.lock_sessions()?;
        Ok(table
            .records
            .values()
            .any(|r| r.user_id == user_id && r.impersonating_user_id.is_none() && r.is_live(now)))
    }

    async fn generate_auth_token(
        &self,
        user_id: i64,
        allow_multiple: bool,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let mut table = self.lock_sessions()?;

        if allow_multiple {
            table.current.remove(&user_id);
        } else {
            let mut superseded = 0usize;
            for record in table.records.values_mut() {
                if record.user_id == user_id
                    && record.is_logged_in
                    && record.impersonating_user_id.is_none()
                {
                    record.is_logged_in = false;
                    superseded += 1;
                }
            }
            table.current.insert(user_id, id);
            if superseded > 0 {
                tracing::info!(user_id, superseded, "Superseded previous sessions");
            }
        }

        if let Some(mut account) = self.users.get_mut(&user_id) {
            account.identity.auth_token_id = Some(id);
        }

        Ok(id)
    }

    async fn save_auth_token(&self, mut record: UserAuthToken) -> Result<(), StoreError> {
        let mut table = self.lock_sessions()?;

        let superseded = record.impersonating_user_id.is_none()
            && matches!(
                table.current.get(&record.user_id),
                Some(current) if *current != record.id
            );
        let already_logged_out = table
            .records
            .get(&record.id)
            .map(|existing| !existing.is_logged_in)
            .unwrap_or(false);

        if superseded || already_logged_out {
            record.is_logged_in = false;
        }

        table.records.insert(record.id, record);
        Ok(())
    }

    async fn find_auth_token(
        &self,
        user_id: i64,
        access_token_hash: &str,
    ) -> Result<Option<UserAuthToken>, StoreError> {
        let table = self.lock_sessions()?;
        Ok(table
            .records
            .values()
            .find(|r| r.user_id == user_id && r.access_token_hash == access_token_hash)
            .cloned())
    }

    async fn find_auth_token_by_id(&self, id: Uuid) -> Result<Option<UserAuthToken>, StoreError> {
        let table = self.lock_sessions()?;
        Ok(table.records.get(&id).cloned())
    }

    async fn logout(&self, user_id: i64, auth_token_id: Uuid) -> Result<bool, StoreError> {
        let mut table = self.lock_sessions()?;
        match table.records.get_mut(&auth_token_id) {
            Some(record) if record.user_id == user_id => {
                record.is_logged_in = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_refresh_token(&self, token: RefreshToken) -> Result<(), StoreError> {
        self.refresh_tokens
            .retain(|_, t| !(t.subject == token.subject && t.client_id == token.client_id));
        self.refresh_tokens.insert(token.id_hash.clone(), token);
        Ok(())
    }

    async fn redeem_refresh_token(
        &self,
        id_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self.refresh_tokens.remove(id_hash).map(|(_, token)| token))
    }

    async fn resources(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.resources.iter().map(|r| r.value().clone()).collect())
    }

    async fn permissions(&self) -> Result<Vec<Permission>, StoreError> {
        Ok(self.permissions.iter().map(|p| p.value().clone()).collect())
    }

    async fn check_authorization(
        &self,
        security_ids: &[Uuid],
        resource_id: Uuid,
        permission_code: i32,
    ) -> Result<AccessFlags, StoreError> {
        let Some(rules) = self.rules.get(&(resource_id, permission_code)) else {
            return Ok(AccessFlags::NO_RULE);
        };

        let mut flags = AccessFlags::NONE;
        for rule in rules.iter().filter(|r| security_ids.contains(&r.security_id)) {
            flags = flags
                | match rule.effect {
                    RuleEffect::Grant => AccessFlags::ACCESS,
                    RuleEffect::Deny => AccessFlags::DENIED,
                };
        }

        Ok(if flags.contains(AccessFlags::DENIED) {
            AccessFlags::DENIED
        } else if flags == AccessFlags::NONE {
            AccessFlags::NO_RULE
        } else {
            flags
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock_sessions().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::utils::hash_secret;
    use chrono::Duration;
    use std::sync::Arc;

    fn store_with_alice() -> (MemoryStore, UserIdentity) {
        let store = MemoryStore::new();
        let alice = UserIdentity::new(1, "alice");
        store
            .insert_user(alice.clone(), PasswordHashString::new("hash".to_string()))
            .unwrap();
        (store, alice)
    }

    fn session(id: Uuid, user_id: i64, token: &str) -> UserAuthToken {
        let now = Utc::now();
        UserAuthToken {
            id,
            user_id,
            client_id: "web".to_string(),
            issued_utc: now,
            expires_utc: now + Duration::minutes(20),
            access_token_hash: hash_secret(token),
            is_logged_in: true,
            is_expired: false,
            client_ip: None,
            user_agent: None,
            impersonating_user_id: None,
        }
    }

    #[tokio::test]
    async fn username_lookup_is_case_insensitive() {
        let (store, alice) = store_with_alice();
        let found = store.find_account_by_username("ALICE").await.unwrap().unwrap();
        assert_eq!(found.identity.user_id, alice.user_id);
        assert!(store.find_account_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let (store, _) = store_with_alice();
        let result = store.insert_user(
            UserIdentity::new(2, "Alice"),
            PasswordHashString::new("hash".to_string()),
        );
        assert!(matches!(result, Err(StoreError::InvalidSeed(_))));
    }

    #[tokio::test]
    async fn new_session_supersedes_previous_in_single_mode() {
        let (store, alice) = store_with_alice();

        let first = store.generate_auth_token(alice.user_id, false).await.unwrap();
        store.save_auth_token(session(first, alice.user_id, "a")).await.unwrap();

        let second = store.generate_auth_token(alice.user_id, false).await.unwrap();
        store.save_auth_token(session(second, alice.user_id, "b")).await.unwrap();

        let first = store.find_auth_token_by_id(first).await.unwrap().unwrap();
        let second = store.find_auth_token_by_id(second).await.unwrap().unwrap();
        assert!(!first.is_logged_in);
        assert!(second.is_logged_in);
        assert_eq!(store.logged_in_session_count(alice.user_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn late_save_of_superseded_session_is_logged_out() {
        let (store, alice) = store_with_alice();

        let first = store.generate_auth_token(alice.user_id, false).await.unwrap();
        let second = store.generate_auth_token(alice.user_id, false).await.unwrap();
        store.save_auth_token(session(second, alice.user_id, "b")).await.unwrap();
        store.save_auth_token(session(first, alice.user_id, "a")).await.unwrap();

        assert_eq!(store.logged_in_session_count(alice.user_id).unwrap(), 1);
        let current = store.find_user_by_id(alice.user_id).await.unwrap().unwrap();
        assert_eq!(current.auth_token_id, Some(second));
    }

    #[tokio::test]
    async fn multiple_mode_keeps_sessions() {
        let (store, alice) = store_with_alice();
        for token in ["a", "b"] {
            let id = store.generate_auth_token(alice.user_id, true).await.unwrap();
            store.save_auth_token(session(id, alice.user_id, token)).await.unwrap();
        }
        assert_eq!(store.logged_in_session_count(alice.user_id).unwrap(), 2);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_never_resurrects() {
        let (store, alice) = store_with_alice();
        let id = store.generate_auth_token(alice.user_id, false).await.unwrap();
        store.save_auth_token(session(id, alice.user_id, "a")).await.unwrap();

        assert!(store.logout(alice.user_id, id).await.unwrap());
        assert!(store.logout(alice.user_id, id).await.unwrap());

        store.save_auth_token(session(id, alice.user_id, "a2")).await.unwrap();
        let record = store.find_auth_token_by_id(id).await.unwrap().unwrap();
        assert!(!record.is_logged_in);
        assert!(!store.has_live_session(alice.user_id).await.unwrap());
    }

    #[tokio::test]
    async fn impersonated_session_is_not_the_users_own() {
        let (store, alice) = store_with_alice();
        let id = store.generate_auth_token(alice.user_id, true).await.unwrap();
        let mut record = session(id, alice.user_id, "imp");
        record.impersonating_user_id = Some(7);
        store.save_auth_token(record).await.unwrap();

        assert!(store.find_auth_token_by_id(id).await.unwrap().unwrap().is_logged_in);
        assert!(!store.has_live_session(alice.user_id).await.unwrap());

        let own = store.generate_auth_token(alice.user_id, false).await.unwrap();
        store.save_auth_token(session(own, alice.user_id, "own")).await.unwrap();
        let mut resaved = session(id, alice.user_id, "imp2");
        resaved.impersonating_user_id = Some(7);
        store.save_auth_token(resaved).await.unwrap();

        assert!(store.find_auth_token_by_id(id).await.unwrap().unwrap().is_logged_in);
        assert!(store.find_auth_token_by_id(own).await.unwrap().unwrap().is_logged_in);
    }

    #[tokio::test]
    async fn logout_of_other_users_session_is_a_no_op() {
        let (store, alice) = store_with_alice();
        let id = store.generate_auth_token(alice.user_id, false).await.unwrap();
        store.save_auth_token(session(id, alice.user_id, "a")).await.unwrap();

        assert!(!store.logout(99, id).await.unwrap());
        assert!(store.has_live_session(alice.user_id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_redemption_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let (plaintext, token) = RefreshToken::issue(
            "alice".to_string(),
            "web".to_string(),
            60,
            "ticket".to_string(),
            Uuid::new_v4(),
        )
        .unwrap();
        store.add_refresh_token(token).await.unwrap();
        let id_hash = hash_secret(&plaintext);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let id_hash = id_hash.clone();
            handles.push(tokio::spawn(async move {
                store.redeem_refresh_token(&id_hash).await.unwrap().is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.refresh_token_count(), 0);
    }

    #[tokio::test]
    async fn refresh_token_replaces_same_subject_and_client() {
        let store = MemoryStore::new();
        for _ in 0..2 {
            let (_, token) = RefreshToken::issue(
                "alice".to_string(),
                "web".to_string(),
                60,
                "ticket".to_string(),
                Uuid::new_v4(),
            )
            .unwrap();
            store.add_refresh_token(token).await.unwrap();
        }
        assert_eq!(store.refresh_token_count(), 1);
    }

    #[tokio::test]
    async fn explicit_deny_wins() {
        let store = MemoryStore::new();
        let resource = Resource {
            id: Uuid::new_v4(),
            name: "Orders".to_string(),
        };
        store.insert_resource(resource.clone());

        let admin = Role::new("admin");
        let blocked = Role::new("blocked");
        for (role, effect) in [(&admin, RuleEffect::Grant), (&blocked, RuleEffect::Deny)] {
            store.insert_rule(AccessRule {
                security_id: role.security_id,
                resource_id: resource.id,
                permission_code: Permission::READ,
                effect,
            });
        }

        let granted = store
            .check_authorization(&[admin.security_id], resource.id, Permission::READ)
            .await
            .unwrap();
        assert!(granted.contains(AccessFlags::ACCESS));

        let both = store
            .check_authorization(
                &[admin.security_id, blocked.security_id],
                resource.id,
                Permission::READ,
            )
            .await
            .unwrap();
        assert_eq!(both, AccessFlags::DENIED);

        let stranger = store
            .check_authorization(&[Uuid::new_v4()], resource.id, Permission::READ)
            .await
            .unwrap();
        assert_eq!(stranger, AccessFlags::NO_RULE);

        let no_rules = store
            .check_authorization(&[admin.security_id], resource.id, Permission::DELETE)
            .await
            .unwrap();
        assert_eq!(no_rules, AccessFlags::NO_RULE);
    }

    #[tokio::test]
    async fn password_update_bumps_stamp() {
        let (store, alice) = store_with_alice();
        let before = store.password_timestamp(alice.user_id).await.unwrap().unwrap();
        let after = store
            .update_password(alice.user_id, PasswordHashString::new("new".to_string()))
            .await
            .unwrap();
        assert!(after > before);
        assert_eq!(
            store.password_timestamp(alice.user_id).await.unwrap(),
            Some(after)
        );
    }
}
