use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::model::ResolvedPermissionMap;

/// Issued by [`PermissionCache::begin`] before a fetch starts; presented back on store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket {
    pub user_id: Uuid,
    seq: u64,
}

#[derive(Default)]
struct Entry {
    map: Option<Arc<ResolvedPermissionMap>>,
    issued: u64,
    applied: u64,
    invalidated_at: u64,
}

#[derive(Default)]
struct Entries {
    next_seq: u64,
    by_user: HashMap<Uuid, Entry>,
}

/// Resolved maps keyed by user id, at most one per user.
///
/// Every fetch is sequenced: a result is applied only if nothing newer has
/// been applied and no invalidation happened after its ticket was issued.
/// Sequence numbers are shared across users, so an invalidated entry can be
/// dropped outright: a recreated entry starts past every ticket issued before it.
#[derive(Default)]
pub struct PermissionCache {
    entries: Mutex<Entries>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: Uuid) -> Option<Arc<ResolvedPermissionMap>> {
        self.entries.lock().by_user.get(&user_id).and_then(|e| e.map.clone())
    }

    pub fn begin(&self, user_id: Uuid) -> CacheTicket {
        let mut entries = self.entries.lock();
        entries.next_seq += 1;
        let seq = entries.next_seq;
        let entry = entries.by_user.entry(user_id).or_insert_with(|| Entry {
            invalidated_at: seq - 1,
            ..Entry::default()
        });
        entry.issued = seq;
        CacheTicket { user_id, seq }
    }

    /// Give up a ticket whose fetch failed. The entry goes away when it holds
    /// no map and no later ticket is outstanding.
    pub fn abandon(&self, ticket: CacheTicket) {
        let mut entries = self.entries.lock();
        let unused = entries
            .by_user
            .get(&ticket.user_id)
            .is_some_and(|e| e.map.is_none() && e.issued == ticket.seq);
        if unused {
            entries.by_user.remove(&ticket.user_id);
        }
    }

    /// Apply a fetched map. Returns false when the result was stale and dropped.
    pub fn store(&self, ticket: CacheTicket, map: Arc<ResolvedPermissionMap>) -> bool {
        let mut entries = self.entries.lock();
        // No entry means it was invalidated after the ticket was issued
        let Some(entry) = entries.by_user.get_mut(&ticket.user_id) else {
            tracing::debug!(
                user_id = %ticket.user_id,
                seq = ticket.seq,
                "discarding permission resolution for an invalidated entry"
            );
            return false;
        };

        if ticket.seq <= entry.applied || ticket.seq <= entry.invalidated_at {
            tracing::debug!(
                user_id = %ticket.user_id,
                seq = ticket.seq,
                applied = entry.applied,
                invalidated_at = entry.invalidated_at,
                "discarding stale permission resolution"
            );
            return false;
        }

        entry.applied = ticket.seq;
        entry.map = Some(map);
        true
    }

    pub fn invalidate(&self, user_id: Uuid) {
        self.entries.lock().by_user.remove(&user_id);
    }

    pub fn clear(&self) {
        self.entries.lock().by_user.clear();
    }

    /// Number of users with a cached map
    pub fn len(&self) -> usize {
        self.entries.lock().by_user.values().filter(|e| e.map.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn tracked_users(&self) -> usize {
        self.entries.lock().by_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::catalog::Role;

    fn map_for(user_id: Uuid) -> Arc<ResolvedPermissionMap> {
        Arc::new(ResolvedPermissionMap::empty(user_id, Role::Member))
    }

    #[test]
    fn test_store_then_get() {
        let cache = PermissionCache::new();
        let user = Uuid::new_v4();
        let ticket = cache.begin(user);
        assert!(cache.store(ticket, map_for(user)));
        assert!(cache.get(user).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_older_result_after_newer_is_discarded() {
        let cache = PermissionCache::new();
        let user = Uuid::new_v4();
        let slow = cache.begin(user);
        let fast = cache.begin(user);

        assert!(cache.store(fast, map_for(user)));
        let applied = cache.get(user).unwrap();
        assert!(!cache.store(slow, map_for(user)));
        assert!(Arc::ptr_eq(&applied, &cache.get(user).unwrap()));
    }

    #[test]
    fn test_older_result_may_land_before_newer() {
        let cache = PermissionCache::new();
        let user = Uuid::new_v4();
        let first = cache.begin(user);
        let second = cache.begin(user);

        assert!(cache.store(first, map_for(user)));
        assert!(cache.store(second, map_for(user)));
    }

    #[test]
    fn test_invalidation_discards_in_flight_results() {
        let cache = PermissionCache::new();
        let user = Uuid::new_v4();
        let in_flight = cache.begin(user);
        cache.invalidate(user);

        assert!(!cache.store(in_flight, map_for(user)));
        assert!(cache.get(user).is_none());

        let fresh = cache.begin(user);
        assert!(cache.store(fresh, map_for(user)));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = PermissionCache::new();
        let b = PermissionCache::new();
        let user = Uuid::new_v4();
        let ticket = a.begin(user);
        a.store(ticket, map_for(user));

        assert!(a.get(user).is_some());
        assert!(b.get(user).is_none());
        a.clear();
        assert!(a.is_empty());
    }

    #[test]
    fn test_invalidated_entries_are_removed() {
        let cache = PermissionCache::new();
        for _ in 0..100 {
            let user = Uuid::new_v4();
            let ticket = cache.begin(user);
            cache.store(ticket, map_for(user));
            cache.invalidate(user);
        }
        assert_eq!(cache.tracked_users(), 0);

        let user = Uuid::new_v4();
        let ticket = cache.begin(user);
        cache.store(ticket, map_for(user));
        cache.clear();
        assert_eq!(cache.tracked_users(), 0);
    }

    #[test]
    fn test_ticket_from_before_invalidation_stays_stale_after_entry_is_recreated() {
        let cache = PermissionCache::new();
        let user = Uuid::new_v4();
        let old = cache.begin(user);
        cache.invalidate(user);
        let new = cache.begin(user);

        assert!(!cache.store(old, map_for(user)));
        assert!(cache.store(new, map_for(user)));
        assert!(cache.get(user).is_some());
    }

    #[test]
    fn test_abandoned_ticket_releases_empty_entry() {
        let cache = PermissionCache::new();
        let user = Uuid::new_v4();
        let failed = cache.begin(user);
        cache.abandon(failed);
        assert_eq!(cache.tracked_users(), 0);

        let first = cache.begin(user);
        let second = cache.begin(user);
        cache.abandon(first);
        assert!(cache.store(second, map_for(user)));
        cache.abandon(second);
        assert!(cache.get(user).is_some());
    }

    #[test]
    fn test_ticket_from_before_clear_is_discarded() {
        let cache = PermissionCache::new();
        let user = Uuid::new_v4();
        let in_flight = cache.begin(user);
        cache.clear();

        assert!(!cache.store(in_flight, map_for(user)));
        assert!(cache.is_empty());
    }
}
