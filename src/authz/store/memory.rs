use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ChangeCallback, PermissionStore, StoreError, SubscriptionHandle, SubscriptionRegistry};
use crate::authz::catalog::{builtin_role_defaults, PermissionKey, Role};
use crate::authz::model::{RolePermissionSet, UserPermissionOverride};

/// In-process permission store, used for embedding and tests
#[derive(Default)]
pub struct MemoryPermissionStore {
    roles: RwLock<HashMap<Role, RolePermissionSet>>,
    overrides: RwLock<HashMap<Uuid, UserPermissionOverride>>,
    subscriptions: SubscriptionRegistry,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_defaults() -> Self {
        let store = Self::new();
        {
            let mut roles = store.roles.write();
            for role in Role::ALL {
                roles.insert(role, builtin_role_defaults(role));
            }
        }
        store
    }

    /// Replace a role's defaults; every subscriber is told since membership is unknown here
    pub fn set_role_defaults(&self, defaults: RolePermissionSet) {
        self.roles.write().insert(defaults.role, defaults);
        self.subscriptions.notify_all();
    }

    pub fn set_user_override(&self, overrides: UserPermissionOverride) {
        let user_id = overrides.user_id;
        self.overrides.write().insert(user_id, overrides);
        self.subscriptions.notify_user(user_id);
    }

    pub fn set_override_entry(&self, user_id: Uuid, key: PermissionKey, granted: bool) {
        self.overrides
            .write()
            .entry(user_id)
            .or_insert_with(|| UserPermissionOverride::new(user_id))
            .entries
            .insert(key, granted);
        self.subscriptions.notify_user(user_id);
    }

    pub fn clear_user_override(&self, user_id: Uuid) {
        self.overrides.write().remove(&user_id);
        self.subscriptions.notify_user(user_id);
    }

    /// Make every subsequent fetch fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetch calls served so far (both kinds)
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, user_id: Uuid) -> usize {
        self.subscriptions.subscriber_count(user_id)
    }

    fn begin_fetch(&self) -> Result<(), StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn fetch_role_defaults(&self, role: Role) -> Result<Option<RolePermissionSet>, StoreError> {
        self.begin_fetch()?;
        Ok(self.roles.read().get(&role).cloned())
    }

    async fn fetch_user_overrides(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserPermissionOverride>, StoreError> {
        self.begin_fetch()?;
        Ok(self.overrides.read().get(&user_id).cloned())
    }

    fn subscribe(&self, user_id: Uuid, on_change: ChangeCallback) -> SubscriptionHandle {
        self.subscriptions.subscribe(user_id, on_change)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.unsubscribe(handle);
    }
}
