//! Per-consumer view of the logged-in user's permissions.
//!
//! A [`PermissionSession`] follows one consumer (a UI component, a CLI run, a
//! websocket) through login, logout and user switches. Checks are synchronous
//! and fail-closed: nothing is granted while there is no user or while a
//! resolution is in flight.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use uuid::Uuid;

use super::catalog::{Action, Module, PermissionKey, Role};
use super::model::ResolvedPermissionMap;
use super::resolver::{PermissionLoadError, PermissionResolver};
use super::store::{ChangeCallback, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl SessionUser {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }
}

#[derive(Debug, Clone)]
pub enum SessionState {
    NoUser,
    Loading {
        user: SessionUser,
    },
    Ready {
        user: SessionUser,
        permissions: Arc<ResolvedPermissionMap>,
    },
}

impl SessionState {
    pub fn user(&self) -> Option<SessionUser> {
        match self {
            SessionState::NoUser => None,
            SessionState::Loading { user } | SessionState::Ready { user, .. } => Some(*user),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading { .. })
    }

    pub fn permissions(&self) -> Option<&Arc<ResolvedPermissionMap>> {
        match self {
            SessionState::Ready { permissions, .. } => Some(permissions),
            _ => None,
        }
    }
}

struct Control {
    generation: u64,
    subscription: Option<SubscriptionHandle>,
}

struct Inner {
    resolver: Arc<PermissionResolver>,
    state: watch::Sender<SessionState>,
    control: Mutex<Control>,
}

impl Inner {
    fn current_user(&self) -> Option<SessionUser> {
        self.state.borrow().user()
    }

    /// Ready -> Loading for the current user. `only_for` restricts it to a user id.
    fn begin_reload(&self, only_for: Option<Uuid>) -> Option<(u64, SessionUser)> {
        let mut control = self.control.lock();
        let user = self.current_user()?;
        if only_for.is_some_and(|id| id != user.user_id) {
            return None;
        }
        control.generation += 1;
        self.state.send_replace(SessionState::Loading { user });
        Some((control.generation, user))
    }

    fn apply(
        &self,
        generation: u64,
        user: SessionUser,
        result: Result<Arc<ResolvedPermissionMap>, PermissionLoadError>,
    ) {
        let control = self.control.lock();
        if control.generation != generation {
            tracing::debug!(
                user_id = %user.user_id,
                generation,
                current = control.generation,
                "dropping superseded permission resolution"
            );
            return;
        }

        let permissions = result.unwrap_or_else(|err| {
            tracing::warn!(user_id = %user.user_id, role = %user.role, error = %err, "permission load failed, session denies all");
            Arc::new(ResolvedPermissionMap::empty(user.user_id, user.role))
        });
        self.state.send_replace(SessionState::Ready { user, permissions });
    }
}

fn spawn_load(inner: &Arc<Inner>, runtime: &Handle, generation: u64, user: SessionUser) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let resolver = Arc::clone(&inner.resolver);

    runtime.spawn(async move {
        let result = resolver.resolve(user.user_id, user.role).await;
        // Session gone: nobody is left to observe the result.
        if let Some(inner) = weak.upgrade() {
            inner.apply(generation, user, result);
        }
    });
}

/// State machine: `NoUser -> Loading -> Ready`, back to `Loading` on refresh
/// or external change, to `NoUser` on logout.
pub struct PermissionSession {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl PermissionSession {
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(resolver: Arc<PermissionResolver>) -> Self {
        Self::with_runtime(resolver, Handle::current())
    }

    pub fn with_runtime(resolver: Arc<PermissionResolver>, runtime: Handle) -> Self {
        let (state, _) = watch::channel(SessionState::NoUser);
        Self {
            inner: Arc::new(Inner {
                resolver,
                state,
                control: Mutex::new(Control {
                    generation: 0,
                    subscription: None,
                }),
            }),
            runtime,
        }
    }

    /// Follow a login, logout or user switch. The previous user's map and
    /// change subscription are dropped entirely.
    pub fn set_user(&self, user: Option<SessionUser>) {
        let mut control = self.inner.control.lock();
        if self.inner.current_user() == user {
            return;
        }

        control.generation += 1;
        if let Some(previous) = control.subscription.take() {
            self.inner.resolver.unsubscribe(previous);
        }

        let Some(user) = user else {
            tracing::debug!("session user cleared");
            self.inner.state.send_replace(SessionState::NoUser);
            return;
        };

        control.subscription = Some(self.inner.resolver.subscribe(user.user_id, self.change_callback()));
        self.inner.state.send_replace(SessionState::Loading { user });
        tracing::debug!(user_id = %user.user_id, role = %user.role, "session user set, loading permissions");

        spawn_load(&self.inner, &self.runtime, control.generation, user);
    }

    fn change_callback(&self) -> ChangeCallback {
        let weak = Arc::downgrade(&self.inner);
        let runtime = self.runtime.clone();
        Arc::new(move |changed: Uuid| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Some((generation, user)) = inner.begin_reload(Some(changed)) {
                tracing::debug!(user_id = %changed, "permission records changed, reloading");
                spawn_load(&inner, &runtime, generation, user);
            }
        })
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.inner.current_user()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    /// Receiver that observes every state transition
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn has_permission(&self, module: Module, action: Action) -> bool {
        self.is_granted(PermissionKey::new(module, action))
    }

    pub fn is_granted(&self, key: PermissionKey) -> bool {
        self.inner
            .state
            .borrow()
            .permissions()
            .is_some_and(|map| map.is_granted(key))
    }

    /// False for an empty list
    pub fn has_any_permission(&self, keys: &[PermissionKey]) -> bool {
        let state = self.inner.state.borrow();
        match state.permissions() {
            Some(map) => keys.iter().any(|key| map.is_granted(*key)),
            None => false,
        }
    }

    /// True for an empty list
    pub fn has_all_permissions(&self, keys: &[PermissionKey]) -> bool {
        if keys.is_empty() {
            return true;
        }
        let state = self.inner.state.borrow();
        match state.permissions() {
            Some(map) => keys.iter().all(|key| map.is_granted(*key)),
            None => false,
        }
    }

    /// Ask the store directly instead of trusting the cached map
    pub async fn check_permission(&self, module: Module, action: Action) -> bool {
        let Some(user) = self.user() else {
            return false;
        };

        match self.inner.resolver.refresh(user.user_id, user.role).await {
            Ok(map) => {
                let granted = map.has(module, action);
                let _control = self.inner.control.lock();
                let still_ready_for_user = matches!(
                    &*self.inner.state.borrow(),
                    SessionState::Ready { user: current, .. } if *current == user
                );
                if still_ready_for_user {
                    self.inner.state.send_replace(SessionState::Ready { user, permissions: map });
                }
                granted
            }
            Err(err) => {
                tracing::warn!(user_id = %user.user_id, error = %err, "fresh permission check failed, denying");
                false
            }
        }
    }

    /// Invalidate and re-resolve the current user's map. No-op without a user.
    pub async fn refresh_permissions(&self) {
        let Some((generation, user)) = self.inner.begin_reload(None) else {
            return;
        };
        let result = self.inner.resolver.refresh(user.user_id, user.role).await;
        self.inner.apply(generation, user, result);
    }

    /// Wait until the session leaves `Loading`
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| !state.is_loading()).await;
    }
}

impl Drop for PermissionSession {
    fn drop(&mut self) {
        let mut control = self.inner.control.lock();
        control.generation += 1;
        if let Some(handle) = control.subscription.take() {
            self.inner.resolver.unsubscribe(handle);
        }
    }
}
