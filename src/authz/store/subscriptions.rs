use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

pub type ChangeCallback = Arc<dyn Fn(Uuid) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    user_id: Uuid,
}

impl SubscriptionHandle {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

/// Callback bookkeeping shared by every store implementation
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, (Uuid, ChangeCallback)>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: Uuid, on_change: ChangeCallback) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, (user_id, on_change));
        tracing::debug!(user_id = %user_id, subscription = id, "permission change subscription added");
        SubscriptionHandle { id, user_id }
    }

    /// Returns false when the handle was already gone
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.subscribers.lock().remove(&handle.id).is_some();
        if removed {
            tracing::debug!(user_id = %handle.user_id, subscription = handle.id, "permission change subscription removed");
        }
        removed
    }

    pub fn subscriber_count(&self, user_id: Uuid) -> usize {
        self.subscribers
            .lock()
            .values()
            .filter(|(subscribed, _)| *subscribed == user_id)
            .count()
    }

    pub fn notify_user(&self, user_id: Uuid) -> usize {
        self.notify_where(|subscribed| subscribed == user_id)
    }

    pub fn notify_users(&self, user_ids: &[Uuid]) -> usize {
        self.notify_where(|subscribed| user_ids.contains(&subscribed))
    }

    pub fn notify_all(&self) -> usize {
        self.notify_where(|_| true)
    }

    fn notify_where(&self, matches: impl Fn(Uuid) -> bool) -> usize {
        // Snapshot first: callbacks may subscribe or unsubscribe re-entrantly.
        let targets: Vec<(Uuid, ChangeCallback)> = self
            .subscribers
            .lock()
            .values()
            .filter(|(user_id, _)| matches(*user_id))
            .map(|(user_id, cb)| (*user_id, Arc::clone(cb)))
            .collect();

        for (user_id, cb) in &targets {
            cb(*user_id);
        }
        targets.len()
    }
}
