use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use steward::authz::store::{ChangeCallback, SubscriptionHandle};
use steward::authz::{
    Action, MemoryPermissionStore, Module, PermissionCache, PermissionKey, PermissionResolver, PermissionSession,
    PermissionStore, Role, RolePermissionSet, SessionState, SessionUser, StoreError, UserPermissionOverride,
};

/// Memory store whose role-default reads block until the test releases them
struct GatedStore {
    inner: MemoryPermissionStore,
    gates: HashMap<Role, Semaphore>,
}

impl GatedStore {
    fn new(gated: &[Role]) -> Self {
        Self {
            inner: MemoryPermissionStore::with_builtin_defaults(),
            gates: gated.iter().map(|role| (*role, Semaphore::new(0))).collect(),
        }
    }

    fn release(&self, role: Role) {
        if let Some(gate) = self.gates.get(&role) {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl PermissionStore for GatedStore {
    async fn fetch_role_defaults(&self, role: Role) -> Result<Option<RolePermissionSet>, StoreError> {
        if let Some(gate) = self.gates.get(&role) {
            gate.acquire()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
                .forget();
        }
        self.inner.fetch_role_defaults(role).await
    }

    async fn fetch_user_overrides(&self, user_id: Uuid) -> Result<Option<UserPermissionOverride>, StoreError> {
        self.inner.fetch_user_overrides(user_id).await
    }

    fn subscribe(&self, user_id: Uuid, on_change: ChangeCallback) -> SubscriptionHandle {
        self.inner.subscribe(user_id, on_change)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.unsubscribe(handle);
    }
}

fn resolver_over(store: Arc<GatedStore>) -> Arc<PermissionResolver> {
    Arc::new(PermissionResolver::new(store, Arc::new(PermissionCache::new())))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn loading_session_denies_until_resolved() -> Result<()> {
    let store = Arc::new(GatedStore::new(&[Role::Treasurer]));
    let session = PermissionSession::new(resolver_over(store.clone()));
    let user = SessionUser::new(Uuid::new_v4(), Role::Treasurer);

    session.set_user(Some(user));
    settle().await;

    assert!(session.loading());
    assert!(!session.has_permission(Module::Finance, Action::View));
    assert!(!session.has_any_permission(&[PermissionKey::new(Module::Finance, Action::View)]));
    assert!(!session.has_all_permissions(&[PermissionKey::new(Module::Dashboard, Action::View)]));

    store.release(Role::Treasurer);
    session.wait_ready().await;

    assert!(session.has_permission(Module::Finance, Action::View));
    assert!(session.has_all_permissions(&[
        PermissionKey::new(Module::Finance, Action::Approve),
        PermissionKey::new(Module::Dashboard, Action::View),
    ]));
    Ok(())
}

#[tokio::test]
async fn dropped_session_ignores_late_resolution() -> Result<()> {
    let store = Arc::new(GatedStore::new(&[Role::Member]));
    let resolver = resolver_over(store.clone());
    let user = SessionUser::new(Uuid::new_v4(), Role::Member);

    let session = PermissionSession::new(Arc::clone(&resolver));
    let rx = session.watch();
    session.set_user(Some(user));
    assert_eq!(store.inner.subscriber_count(user.user_id), 1);

    drop(session);
    assert_eq!(store.inner.subscriber_count(user.user_id), 0);

    store.release(Role::Member);
    settle().await;

    // The resolution still finished and was cached, but no state was published.
    assert!(resolver.cache().get(user.user_id).is_some());
    assert!(matches!(*rx.borrow(), SessionState::Loading { .. }));
    Ok(())
}

#[tokio::test]
async fn switching_users_never_mixes_grants() -> Result<()> {
    let store = Arc::new(GatedStore::new(&[Role::Treasurer, Role::Member]));
    let session = PermissionSession::new(resolver_over(store.clone()));
    let first = SessionUser::new(Uuid::new_v4(), Role::Treasurer);
    let second = SessionUser::new(Uuid::new_v4(), Role::Member);

    session.set_user(Some(first));
    settle().await;
    session.set_user(Some(second));
    assert_eq!(store.inner.subscriber_count(first.user_id), 0);

    // The second user's load lands first, then the first user's late result
    store.release(Role::Member);
    session.wait_ready().await;
    store.release(Role::Treasurer);
    settle().await;

    let state = session.state();
    assert_eq!(state.user(), Some(second));
    let map = state.permissions().cloned().unwrap_or_else(|| panic!("expected ready, got {:?}", state));
    assert_eq!(map.user_id, second.user_id);
    assert!(session.has_permission(Module::Events, Action::View));
    assert!(!session.has_permission(Module::Finance, Action::View));
    Ok(())
}

#[tokio::test]
async fn refresh_picks_up_admin_change() -> Result<()> {
    let store = Arc::new(GatedStore::new(&[]));
    let session = PermissionSession::new(resolver_over(store.clone()));
    let user = SessionUser::new(Uuid::new_v4(), Role::Member);

    session.set_user(Some(user));
    session.wait_ready().await;
    assert!(!session.has_permission(Module::Blog, Action::Create));

    store
        .inner
        .set_override_entry(user.user_id, PermissionKey::new(Module::Blog, Action::Create), true);
    session.refresh_permissions().await;

    assert!(!session.loading());
    assert!(session.has_permission(Module::Blog, Action::Create));
    assert!(session.check_permission(Module::Blog, Action::Create).await);
    Ok(())
}

#[tokio::test]
async fn store_outage_fails_closed() -> Result<()> {
    let store = Arc::new(GatedStore::new(&[]));
    let session = PermissionSession::new(resolver_over(store.clone()));
    let user = SessionUser::new(Uuid::new_v4(), Role::SuperAdmin);

    store.inner.set_failing(true);
    session.set_user(Some(user));
    session.wait_ready().await;

    assert!(!session.loading());
    assert!(!session.has_permission(Module::Dashboard, Action::View));
    assert!(!session.check_permission(Module::Dashboard, Action::View).await);

    store.inner.set_failing(false);
    session.refresh_permissions().await;
    assert!(session.has_permission(Module::Permissions, Action::Manage));
    Ok(())
}
