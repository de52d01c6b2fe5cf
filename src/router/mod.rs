//! C3: change router. Materializes a typed [`Change`] from each decoded
//! row event and fans it out to per-account topic subscribers plus a
//! global `changes` topic used by directory-sync invalidation.

use crate::db::ChangeOp;
use crate::replication::{Lsn, RowChange};
use meridian_proto::AccountId;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct Change {
    pub op: ChangeOp,
    pub table: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub lsn: Lsn,
}

impl Change {
    /// The account_id carried by whichever side of the change is present;
    /// inserts/updates carry it on `new`, deletes on `old`.
    pub fn account_id(&self) -> Option<AccountId> {
        let data = self.new.as_ref().or(self.old.as_ref())?;
        data.get("account_id")?.as_str().and_then(|s| s.parse().ok()).map(AccountId)
    }
}

const CHANGES_TOPIC_CAPACITY: usize = 1024;
const ACCOUNT_TOPIC_CAPACITY: usize = 256;

/// Owns the broadcast channels change subscribers attach to. One global
/// `changes` topic, plus lazily created per-account topics.
pub struct Router {
    changes: broadcast::Sender<Change>,
    accounts: dashmap::DashMap<AccountId, broadcast::Sender<Change>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGES_TOPIC_CAPACITY);
        Self { changes, accounts: dashmap::DashMap::new() }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    pub fn subscribe_account(&self, account_id: AccountId) -> broadcast::Receiver<Change> {
        self.accounts
            .entry(account_id)
            .or_insert_with(|| broadcast::channel(ACCOUNT_TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Materialize and deliver a raw row event. Delivery is best-effort:
    /// a `send` with no receivers is not an error (a lagging subscriber
    /// drops and rejoins via its own cache resync).
    pub fn route(&self, raw: RowChange) {
        let (op, old, new) = match raw.payload {
            crate::replication::frame::Pgoutput::Insert { tuple, .. } => (ChangeOp::Insert, None, Some(tuple)),
            crate::replication::frame::Pgoutput::Update { old, new, .. } => (ChangeOp::Update, old, Some(new)),
            crate::replication::frame::Pgoutput::Delete { old, .. } => (ChangeOp::Delete, Some(old), None),
            _ => return,
        };
        let change = Change { op, table: raw.table, old, new, lsn: raw.lsn };

        let _ = self.changes.send(change.clone());
        if let Some(account_id) = change.account_id() {
            if let Some(sender) = self.accounts.get(&account_id) {
                let _ = sender.send(change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::frame::Pgoutput;

    fn row(op_payload: Pgoutput, lsn: u64) -> RowChange {
        RowChange { lsn: Lsn(lsn), table: "resources".to_string(), payload: op_payload }
    }

    #[test]
    fn insert_routes_to_changes_and_account_topic() {
        let router = Router::new();
        let account_id = AccountId::new();
        let mut changes_rx = router.subscribe_changes();
        let mut account_rx = router.subscribe_account(account_id);

        router.route(row(
            Pgoutput::Insert { relation_id: 1, tuple: serde_json::json!({"account_id": account_id.0.to_string()}) },
            1,
        ));

        assert!(changes_rx.try_recv().is_ok());
        assert!(account_rx.try_recv().is_ok());
    }

    #[test]
    fn delete_with_no_account_id_still_reaches_global_topic() {
        let router = Router::new();
        let mut changes_rx = router.subscribe_changes();
        router.route(row(Pgoutput::Delete { relation_id: 1, old: serde_json::json!({}) }, 2));
        assert!(changes_rx.try_recv().is_ok());
    }

    #[test]
    fn begin_and_relation_frames_are_not_routed() {
        let router = Router::new();
        let mut changes_rx = router.subscribe_changes();
        router.route(row(Pgoutput::Begin { final_lsn: 0, commit_ts_micros: 0 }, 3));
        assert!(changes_rx.try_recv().is_err());
    }
}
