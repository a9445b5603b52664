//! Presence Registry
//!
//! In-memory map from online user ids to their live connection handle.
//! The connection lifecycle in `realtime` is the only writer; the delivery
//! dispatcher is a read-only consumer. All access goes through one lock and
//! snapshots are copied out, so no reader ever observes a half-applied
//! mutation.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::models::PresenceEntry;
use crate::realtime::ConnectionHandle;

#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<String, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry for `user_id` unless one already exists. Returns whether
    /// a new entry was added; a repeat identify from the same user is a
    /// no-op, not a protocol violation.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(user_id) {
            return false;
        }
        entries.insert(user_id.to_string(), handle);
        true
    }

    /// Remove any entry carried by `handle`. Unknown handles are ignored.
    /// Returns the number of entries removed so the caller knows whether a
    /// broadcast is due.
    pub fn unregister(&self, handle: &ConnectionHandle) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.id() != handle.id());
        before - entries.len()
    }

    /// Current handle for `user_id`, if they are online. The clone is handed
    /// out so the lock is released before the caller emits anything.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries.read().get(user_id).cloned()
    }

    /// Consistent copy of the registry at call time, ordered by user id so
    /// consecutive snapshots of the same state are identical.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut snapshot: Vec<PresenceEntry> = self
            .entries
            .read()
            .iter()
            .map(|(user_id, handle)| PresenceEntry {
                user_id: user_id.clone(),
                connection_handle: handle.id().to_string(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_add_only() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = ConnectionHandle::new();
        let (h2, _rx2) = ConnectionHandle::new();

        assert!(registry.register("alice", h1.clone()));
        // Second identify (even from another connection) is a no-op
        assert!(!registry.register("alice", h2));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].connection_handle, h1.id());
    }

    #[test]
    fn unregister_removes_by_handle() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = ConnectionHandle::new();
        let (h2, _rx2) = ConnectionHandle::new();

        registry.register("alice", h1.clone());
        registry.register("bob", h2.clone());

        assert_eq!(registry.unregister(&h1), 1);
        assert!(registry.lookup("alice").is_none());
        assert!(registry.lookup("bob").is_some());
    }

    #[test]
    fn unregister_of_unknown_handle_is_noop() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = ConnectionHandle::new();
        let (stranger, _rx2) = ConnectionHandle::new();

        registry.register("alice", h1);
        assert_eq!(registry.unregister(&stranger), 0);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_user_id() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = ConnectionHandle::new();
        let (h2, _rx2) = ConnectionHandle::new();
        let (h3, _rx3) = ConnectionHandle::new();

        registry.register("carol", h1);
        registry.register("alice", h2);
        registry.register("bob", h3);

        let users: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|entry| entry.user_id)
            .collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn concurrent_churn_never_corrupts_the_registry() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(PresenceRegistry::new());
        let workers: usize = 8;

        let mut joins = Vec::new();
        for worker in 0..workers {
            let registry = registry.clone();
            joins.push(thread::spawn(move || {
                let user = format!("user-{}", worker);
                for _ in 0..200 {
                    let (handle, _rx) = ConnectionHandle::new();
                    assert!(registry.register(&user, handle.clone()));
                    // Only this thread touches `user`, so a completed
                    // register must be observable until its unregister
                    let seen = registry.lookup(&user).map(|h| h.id().to_string());
                    assert_eq!(seen.as_deref(), Some(handle.id()));
                    assert_eq!(registry.unregister(&handle), 1);
                    assert!(registry.lookup(&user).is_none());
                }
            }));
        }

        let snapshotter = {
            let registry = registry.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = registry.snapshot();
                    // At most one entry per user, strictly ordered, never a
                    // half-applied mutation
                    for pair in snapshot.windows(2) {
                        assert!(pair[0].user_id < pair[1].user_id);
                    }
                    assert!(snapshot.len() <= workers);
                }
            })
        };

        for join in joins {
            join.join().unwrap();
        }
        snapshotter.join().unwrap();
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn stale_entry_survives_until_its_own_disconnect() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = ConnectionHandle::new();
        let (new, _rx2) = ConnectionHandle::new();

        registry.register("alice", old.clone());
        registry.register("alice", new.clone());

        // The new connection's disconnect must not evict the live entry
        assert_eq!(registry.unregister(&new), 0);
        assert_eq!(registry.lookup("alice").map(|h| h.id().to_string()), Some(old.id().to_string()));

        assert_eq!(registry.unregister(&old), 1);
        assert!(registry.snapshot().is_empty());
    }
}
