use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use super::{MemoryStore, StoreError};
use crate::config::MAX_TOKEN_LIFETIME_MINUTES;
use crate::models::{
    AccessRule, ApplicationType, AuthClient, Permission, Resource, Role, RuleEffect, UserIdentity,
};
use crate::utils::{hash_password, hash_secret, Password};

/// Provisioning data loaded into a [`MemoryStore`] at start-up. Passwords and
/// client secrets are plaintext here and hashed on load.
#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub clients: Vec<SeedClient>,
    #[serde(default)]
    pub resources: Vec<SeedResource>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub rules: Vec<SeedRule>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub user_id: i64,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub security_id: Option<Uuid>,
    /// Role names, resolved against `roles`.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub culture: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedClient {
    pub client_id: String,
    #[serde(default)]
    pub secret: String,
    pub name: String,
    pub application_type: ApplicationType,
    #[serde(default = "enabled_default")]
    pub active: bool,
    #[serde(default)]
    pub refresh_token_lifetime_minutes: i64,
    #[serde(default)]
    pub allowed_origin: String,
    #[serde(default)]
    pub access_token_expiry_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SeedResource {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
}

/// Access rule addressed by names. Exactly one of `role` or `user` is set.
#[derive(Debug, Deserialize)]
pub struct SeedRule {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    pub resource: String,
    pub permission: String,
    pub effect: RuleEffect,
}

fn enabled_default() -> bool {
    true
}

pub async fn load_seed(path: impl AsRef<Path>) -> Result<SeedFile, StoreError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        StoreError::InvalidSeed(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| StoreError::InvalidSeed(format!("{}: {}", path.display(), e)))
}

impl MemoryStore {
    pub fn from_seed(seed: SeedFile) -> Result<Self, StoreError> {
        let store = MemoryStore::new();

        for permission in seed.permissions {
            store.insert_permission(permission);
        }

        let roles: HashMap<String, Role> = seed
            .roles
            .into_iter()
            .map(|r| (r.name.to_lowercase(), r))
            .collect();

        let mut user_sids = HashMap::new();
        for user in seed.users {
            let mut identity = UserIdentity::new(user.user_id, user.username.clone());
            if let Some(sid) = user.security_id {
                identity.security_id = sid;
            }
            for name in &user.roles {
                let role = roles.get(&name.to_lowercase()).ok_or_else(|| {
                    StoreError::InvalidSeed(format!(
                        "user {} references unknown role {}",
                        user.username, name
                    ))
                })?;
                identity.roles.push(role.clone());
            }
            identity.full_name = user.full_name;
            identity.culture = user.culture;
            identity.enabled = user.enabled;

            let hash = hash_password(&Password::new(user.password))?;
            user_sids.insert(user.username.to_lowercase(), identity.security_id);
            store.insert_user(identity, hash)?;
        }

        for client in seed.clients {
            if client.application_type == ApplicationType::NativeConfidential
                && client.secret.is_empty()
            {
                return Err(StoreError::InvalidSeed(format!(
                    "confidential client {} has no secret",
                    client.client_id
                )));
            }
            let lifetimes = [
                Some(client.refresh_token_lifetime_minutes),
                client.access_token_expiry_minutes,
            ];
            if lifetimes
                .into_iter()
                .flatten()
                .any(|m| m > MAX_TOKEN_LIFETIME_MINUTES)
            {
                return Err(StoreError::InvalidSeed(format!(
                    "client {} token lifetime exceeds {} minutes",
                    client.client_id, MAX_TOKEN_LIFETIME_MINUTES
                )));
            }
            store.insert_client(AuthClient {
                secret_hash: hash_secret(&client.secret),
                client_id: client.client_id,
                name: client.name,
                application_type: client.application_type,
                active: client.active,
                refresh_token_lifetime_minutes: client.refresh_token_lifetime_minutes,
                allowed_origin: client.allowed_origin,
                access_token_expiry_minutes: client.access_token_expiry_minutes,
            });
        }

        let mut resource_ids = HashMap::new();
        for resource in seed.resources {
            let id = resource.id.unwrap_or_else(Uuid::new_v4);
            resource_ids.insert(resource.name.to_lowercase(), id);
            store.insert_resource(Resource {
                id,
                name: resource.name,
            });
        }

        let permission_codes: HashMap<String, i32> = store
            .permissions
            .iter()
            .map(|p| (p.name.to_lowercase(), p.code))
            .collect();

        for rule in seed.rules {
            let security_id = match (&rule.role, &rule.user) {
                (Some(role), None) => roles.get(&role.to_lowercase()).map(|r| r.security_id),
                (None, Some(user)) => user_sids.get(&user.to_lowercase()).copied(),
                _ => None,
            }
            .ok_or_else(|| {
                StoreError::InvalidSeed(format!(
                    "rule on {} must name exactly one known role or user",
                    rule.resource
                ))
            })?;

            let resource_id = *resource_ids
                .get(&rule.resource.to_lowercase())
                .ok_or_else(|| {
                    StoreError::InvalidSeed(format!("unknown resource {}", rule.resource))
                })?;
            let permission_code = *permission_codes
                .get(&rule.permission.to_lowercase())
                .ok_or_else(|| {
                    StoreError::InvalidSeed(format!("unknown permission {}", rule.permission))
                })?;

            store.insert_rule(AccessRule {
                security_id,
                resource_id,
                permission_code,
                effect: rule.effect,
            });
        }

        tracing::info!(
            users = store.users.len(),
            clients = store.clients.len(),
            resources = store.resources.len(),
            "Credential store seeded"
        );

        Ok(store)
    }
}
