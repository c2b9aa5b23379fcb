use axum::http::Method;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{bounded, ServiceError};
use crate::identity::Principal;
use crate::models::{AccessFlags, Permission};
use crate::store::CredentialStore;

/// Name lookups for resources and permissions, keyed case-insensitively.
#[derive(Debug, Default)]
struct Catalog {
    resources: HashMap<String, Uuid>,
    permissions: HashMap<String, i32>,
}

/// Resource/permission checks against a principal's security ids.
///
/// The name catalog is loaded from the store on first use and kept until
/// [`invalidate`](Self::invalidate) is called.
pub struct AuthorizationEngine {
    store: Arc<dyn CredentialStore>,
    catalog: RwLock<Option<Arc<Catalog>>>,
    bypass: bool,
    timeout: Duration,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<dyn CredentialStore>, bypass: bool, timeout: Duration) -> Self {
        Self {
            store,
            catalog: RwLock::new(None),
            bypass,
            timeout,
        }
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, ServiceError> {
        if let Some(catalog) = self.catalog.read().await.as_ref() {
            return Ok(catalog.clone());
        }

        let mut slot = self.catalog.write().await;
        if let Some(catalog) = slot.as_ref() {
            return Ok(catalog.clone());
        }

        let resources = bounded(self.timeout, self.store.resources()).await?;
        let permissions = bounded(self.timeout, self.store.permissions()).await?;
        let catalog = Arc::new(Catalog {
            resources: resources
                .into_iter()
                .map(|r| (r.name.to_lowercase(), r.id))
                .collect(),
            permissions: permissions
                .into_iter()
                .map(|p| (p.name.to_lowercase(), p.code))
                .collect(),
        });
        tracing::debug!(
            resources = catalog.resources.len(),
            permissions = catalog.permissions.len(),
            "Authorization catalog loaded"
        );

        *slot = Some(catalog.clone());
        Ok(catalog)
    }

    /// Drop the cached catalog; the next check reloads it.
    pub async fn invalidate(&self) {
        *self.catalog.write().await = None;
        tracing::info!("Authorization catalog invalidated");
    }

    /// With neither a resource nor a permission the request only needs to be
    /// authenticated. A missing permission is derived from the HTTP method.
    pub async fn is_authorized(
        &self,
        principal: &Principal,
        resource: Option<&str>,
        permission: Option<&str>,
        method: Option<&Method>,
    ) -> Result<bool, ServiceError> {
        let resource = resource.filter(|r| !r.is_empty());
        let permission = permission.filter(|p| !p.is_empty());

        if resource.is_none() && permission.is_none() {
            return Ok(true);
        }

        let identity = principal.identity();
        if self.bypass {
            tracing::warn!(
                user = identity.name().unwrap_or("-"),
                resource = resource.unwrap_or("-"),
                permission = permission.unwrap_or("-"),
                "Authorization bypassed by configuration"
            );
            return Ok(true);
        }

        let Some(resource_name) = resource else {
            tracing::warn!(permission = permission.unwrap_or("-"), "Permission check without resource");
            return Ok(false);
        };
        let Some(permission_name) = permission.or_else(|| method.and_then(Permission::name_for_method))
        else {
            tracing::warn!(resource = resource_name, "No permission for request method");
            return Ok(false);
        };

        let catalog = self.catalog().await?;
        let Some(resource_id) = catalog.resources.get(&resource_name.to_lowercase()).copied() else {
            tracing::warn!(resource = resource_name, "Unknown resource");
            return Ok(false);
        };
        let Some(code) = catalog
            .permissions
            .get(&permission_name.to_lowercase())
            .copied()
        else {
            tracing::warn!(permission = permission_name, "Unknown permission");
            return Ok(false);
        };

        let security_ids = identity.security_ids();
        let flags = bounded(
            self.timeout,
            self.store
                .check_authorization(&security_ids, resource_id, code),
        )
        .await?;

        let granted = flags.contains(AccessFlags::ACCESS) && !flags.contains(AccessFlags::DENIED);
        if !granted {
            tracing::info!(
                user = identity.name().unwrap_or("-"),
                resource = resource_name,
                permission = permission_name,
                flags = flags.bits(),
                "Access denied"
            );
        }
        Ok(granted)
    }
}
