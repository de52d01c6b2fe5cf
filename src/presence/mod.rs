//! C7: presence. Wraps [`meridian_crdt::PresenceTopic`] with the
//! operations the client/gateway channels and relay selection need:
//! `connect`, `all_connected_relays`, `subscribe`.

use meridian_crdt::{HybridTimestamp, PresenceTopic, ServerId};
use meridian_proto::{ClientId, GatewayId, RelayId};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Mutex;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct PresenceDiff<Id> {
    pub joins: Vec<Id>,
    pub leaves: Vec<Id>,
}

const PRESENCE_DIFF_CAPACITY: usize = 256;

/// One cluster-wide topic's worth of presence plus its diff broadcast.
pub struct Topic<Id: Eq + Hash + Clone + Send + Sync + 'static> {
    entries: PresenceTopic<Id>,
    diffs: broadcast::Sender<PresenceDiff<Id>>,
    clock: Mutex<HybridTimestamp>,
}

impl<Id: Eq + Hash + Clone + Send + Sync + 'static> Default for Topic<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Eq + Hash + Clone + Send + Sync + 'static> Topic<Id> {
    #[must_use]
    pub fn new() -> Self {
        let (diffs, _) = broadcast::channel(PRESENCE_DIFF_CAPACITY);
        Self { entries: PresenceTopic::new(), diffs, clock: Mutex::new(HybridTimestamp::zero(ServerId(0))) }
    }

    fn next_stamp(&self, node: ServerId) -> HybridTimestamp {
        let now_millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut clock = self.clock.lock().unwrap();
        if clock.node() != node {
            *clock = HybridTimestamp::zero(node);
        }
        *clock = clock.tick(now_millis);
        *clock
    }

    pub fn connect(&self, node: ServerId, id: Id, stamp_secret: String) {
        let stamp = self.next_stamp(node);
        self.entries.join(id.clone(), stamp_secret, stamp);
        let _ = self.diffs.send(PresenceDiff { joins: vec![id], leaves: vec![] });
    }

    /// Implicit disconnect on socket close.
    pub fn disconnect(&self, node: ServerId, id: &Id) {
        let stamp = self.next_stamp(node);
        self.entries.leave(id, stamp);
        let _ = self.diffs.send(PresenceDiff { joins: vec![], leaves: vec![id.clone()] });
    }

    #[must_use]
    pub fn all_connected_except(&self, except: &[Id]) -> Vec<Id> {
        let except_set: HashSet<Id> = except.iter().cloned().collect();
        self.entries.online_except(&except_set)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceDiff<Id>> {
        self.diffs.subscribe()
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.entries.online_count()
    }
}

/// The three presence topics the spec names: global relays, gateways and
/// clients.
#[derive(Default)]
pub struct Presence {
    pub relays: Topic<RelayId>,
    pub gateways: Topic<GatewayId>,
    pub clients: Topic<ClientId>,
}

impl Presence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn all_connected_relays(&self, except_ids: &[RelayId]) -> Vec<RelayId> {
        self.relays.all_connected_except(except_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_then_all_connected_relays_includes_it() {
        let presence = Presence::new();
        let relay_id = RelayId::new();
        presence.relays.connect(ServerId(1), relay_id, "secret".into());
        assert!(presence.all_connected_relays(&[]).contains(&relay_id));
    }

    #[test]
    fn except_ids_are_excluded() {
        let presence = Presence::new();
        let relay_id = RelayId::new();
        presence.relays.connect(ServerId(1), relay_id, "secret".into());
        assert!(!presence.all_connected_relays(&[relay_id]).contains(&relay_id));
    }

    #[test]
    fn disconnect_removes_from_online_set() {
        let presence = Presence::new();
        let relay_id = RelayId::new();
        presence.relays.connect(ServerId(1), relay_id, "secret".into());
        presence.relays.disconnect(ServerId(1), &relay_id);
        assert!(!presence.all_connected_relays(&[]).contains(&relay_id));
    }
}
