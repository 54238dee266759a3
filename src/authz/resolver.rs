use std::sync::Arc;

use uuid::Uuid;

use super::cache::PermissionCache;
use super::catalog::Role;
use super::model::{ResolvedPermissionMap, RolePermissionSet, UserPermissionOverride};
use super::store::{ChangeCallback, PermissionStore, StoreError, SubscriptionHandle};

#[derive(thiserror::Error, Debug)]
pub enum PermissionLoadError {
    #[error("cannot resolve permissions without a user id")]
    InvalidUser,
    #[error("failed to load defaults for role {role}: {source}")]
    RoleDefaults {
        role: Role,
        #[source]
        source: StoreError,
    },
    #[error("failed to load overrides for user {user_id}: {source}")]
    Overrides {
        user_id: Uuid,
        #[source]
        source: StoreError,
    },
}

/// Produces the resolved permission map of a user.
///
/// Resolution order:
/// 1. cached map for the same user and role -> return it
/// 2. fetch role defaults (missing role records mean an empty set)
/// 3. fetch user overrides and apply them on top
/// 4. cache the merge, unless a newer result or an invalidation beat it
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
    cache: Arc<PermissionCache>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<PermissionCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    pub async fn resolve(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Arc<ResolvedPermissionMap>, PermissionLoadError> {
        if user_id.is_nil() {
            return Err(PermissionLoadError::InvalidUser);
        }

        if let Some(cached) = self.cache.get(user_id) {
            if cached.role == role {
                tracing::debug!(user_id = %user_id, role = %role, "permission cache hit");
                return Ok(cached);
            }
        }

        self.fetch(user_id, role).await
    }

    /// Drop the cached map and resolve from the store again
    pub async fn refresh(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Arc<ResolvedPermissionMap>, PermissionLoadError> {
        if user_id.is_nil() {
            return Err(PermissionLoadError::InvalidUser);
        }
        self.cache.invalidate(user_id);
        self.fetch(user_id, role).await
    }

    /// Fail-closed variant: a load failure yields an empty, uncached map
    pub async fn resolve_or_empty(&self, user_id: Uuid, role: Role) -> Arc<ResolvedPermissionMap> {
        match self.resolve(user_id, role).await {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(user_id = %user_id, role = %role, error = %err, "permission load failed, denying all");
                Arc::new(ResolvedPermissionMap::empty(user_id, role))
            }
        }
    }

    pub fn invalidate(&self, user_id: Uuid) {
        tracing::debug!(user_id = %user_id, "permission cache invalidated");
        self.cache.invalidate(user_id);
    }

    /// Watch a user's permission records. The cache entry is dropped before
    /// `on_change` runs, so a resolve from inside the callback fetches fresh data.
    pub fn subscribe(&self, user_id: Uuid, on_change: ChangeCallback) -> SubscriptionHandle {
        let cache = Arc::clone(&self.cache);
        let wrapped: ChangeCallback = Arc::new(move |changed: Uuid| {
            cache.invalidate(changed);
            on_change(changed);
        });
        self.store.subscribe(user_id, wrapped)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.store.unsubscribe(handle);
    }

    async fn fetch(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Arc<ResolvedPermissionMap>, PermissionLoadError> {
        let ticket = self.cache.begin(user_id);

        let (defaults, overrides) = match self.load_records(user_id, role).await {
            Ok(records) => records,
            Err(err) => {
                self.cache.abandon(ticket);
                return Err(err);
            }
        };

        let map = Arc::new(ResolvedPermissionMap::merge(user_id, &defaults, overrides.as_ref()));
        tracing::debug!(
            user_id = %user_id,
            role = %role,
            granted = map.granted().len(),
            overrides = overrides.as_ref().map(|o| o.entries.len()).unwrap_or(0),
            "permissions resolved"
        );

        if self.cache.store(ticket, Arc::clone(&map)) {
            return Ok(map);
        }

        // A newer result already landed; prefer it when it is for the same role.
        Ok(self
            .cache
            .get(user_id)
            .filter(|current| current.role == role)
            .unwrap_or(map))
    }

    async fn load_records(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<(RolePermissionSet, Option<UserPermissionOverride>), PermissionLoadError> {
        let defaults = self
            .store
            .fetch_role_defaults(role)
            .await
            .map_err(|source| {
                tracing::warn!(user_id = %user_id, role = %role, error = %source, "role defaults fetch failed");
                PermissionLoadError::RoleDefaults { role, source }
            })?
            .unwrap_or_else(|| RolePermissionSet::empty(role));

        let overrides = self
            .store
            .fetch_user_overrides(user_id)
            .await
            .map_err(|source| {
                tracing::warn!(user_id = %user_id, error = %source, "user overrides fetch failed");
                PermissionLoadError::Overrides { user_id, source }
            })?;

        Ok((defaults, overrides))
    }
}
