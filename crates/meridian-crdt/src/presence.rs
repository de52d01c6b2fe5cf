//! Cluster-wide presence: `topic → id → metadata`, merged CRDT-style so any
//! node can accept a join/leave and gossip it without coordination.

use crate::clock::HybridTimestamp;
use crate::lww::LwwRegister;
use crate::traits::Mergeable;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// What's known about one online entity. `None` means "left" (a tombstone,
/// not a removed row) so the LWW merge can still order a rejoin against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub online_at: Option<u64>,
    pub stamp_secret: String,
}

impl Presence {
    #[must_use]
    pub fn online(online_at: u64, stamp_secret: impl Into<String>) -> Self {
        Self { online_at: Some(online_at), stamp_secret: stamp_secret.into() }
    }

    #[must_use]
    pub fn offline() -> Self {
        Self { online_at: None, stamp_secret: String::new() }
    }

    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.online_at.is_some()
    }
}

/// One topic's presence set (e.g. all gateways, or all clients of an
/// account). Entries are LWW registers so a late-arriving leave can't
/// un-leave an entity that already rejoined with a newer stamp, and vice
/// versa.
#[derive(Debug, Default)]
pub struct PresenceTopic<Id: Eq + Hash + Clone> {
    entries: DashMap<Id, LwwRegister<Presence>>,
}

impl<Id: Eq + Hash + Clone> PresenceTopic<Id> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn join(&self, id: Id, stamp_secret: impl Into<String>, stamp: HybridTimestamp) {
        let presence = Presence::online(stamp.millis(), stamp_secret);
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                e.get_mut().set(presence, stamp);
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(LwwRegister::new(presence, stamp));
            }
        }
    }

    pub fn leave(&self, id: &Id, stamp: HybridTimestamp) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.set(Presence::offline(), stamp);
        }
    }

    /// Snapshot of ids currently online, excluding any in `except`.
    #[must_use]
    pub fn online_except(&self, except: &HashSet<Id>) -> Vec<Id> {
        self.entries
            .iter()
            .filter(|e| e.value().get().is_online() && !except.contains(e.key()))
            .map(|e| e.key().clone())
            .collect()
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value().get().is_online()).count()
    }

    /// Merge a remote node's view of one entry into this topic.
    pub fn merge_entry(&self, id: Id, remote: LwwRegister<Presence>) -> bool {
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => e.get_mut().merge(&remote),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(remote);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ServerId;

    #[test]
    fn join_then_online_except_includes_it() {
        let topic: PresenceTopic<u32> = PresenceTopic::new();
        topic.join(1, "secret", HybridTimestamp::new(10, 0, ServerId(1)));
        let online = topic.online_except(&HashSet::new());
        assert_eq!(online, vec![1]);
    }

    #[test]
    fn leave_excludes_from_online() {
        let topic: PresenceTopic<u32> = PresenceTopic::new();
        let t0 = HybridTimestamp::new(10, 0, ServerId(1));
        topic.join(1, "secret", t0);
        topic.leave(&1, t0.tick(20));
        assert!(topic.online_except(&HashSet::new()).is_empty());
    }

    #[test]
    fn stale_leave_does_not_undo_newer_join() {
        let topic: PresenceTopic<u32> = PresenceTopic::new();
        let t_join = HybridTimestamp::new(20, 0, ServerId(1));
        let t_stale_leave = HybridTimestamp::new(10, 0, ServerId(2));
        topic.join(1, "secret", t_join);
        topic.leave(&1, t_stale_leave);
        assert_eq!(topic.online_except(&HashSet::new()), vec![1]);
    }

    #[test]
    fn except_set_filters_results() {
        let topic: PresenceTopic<u32> = PresenceTopic::new();
        let t0 = HybridTimestamp::new(10, 0, ServerId(1));
        topic.join(1, "s1", t0);
        topic.join(2, "s2", t0.tick(11));
        let except: HashSet<u32> = [1].into_iter().collect();
        assert_eq!(topic.online_except(&except), vec![2]);
    }
}
