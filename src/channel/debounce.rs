//! Relay-presence debouncing (§4.8): collapse a burst of `presence_diff`
//! events on the relay topic into a single delayed recheck, discarding any
//! timer firing that's been superseded by a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Debouncer {
    current_ref: Arc<AtomicU64>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debouncer {
    #[must_use]
    pub fn new() -> Self {
        Self { current_ref: Arc::new(AtomicU64::new(0)) }
    }

    /// Cancel any pending check by minting a new ref, then schedule a fire
    /// after `delay`. Returns a receiver that yields exactly once, with the
    /// ref that was current when it's delivered — the caller discards the
    /// message if that ref no longer matches `current_ref()`.
    pub fn schedule(&self, delay: Duration) -> mpsc::Receiver<u64> {
        let this_ref = self.current_ref.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(1);
        let current_ref = self.current_ref.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current_ref.load(Ordering::SeqCst) == this_ref {
                let _ = tx.send(this_ref).await;
            }
        });
        rx
    }

    #[must_use]
    pub fn current_ref(&self) -> u64 {
        self.current_ref.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_current(&self, r: u64) -> bool {
        self.current_ref() == r
    }
}

/// §4.8: after a debounced recheck fires, decide whether a fresh
/// `relays_presence` push is warranted. `cached` is the set already sent
/// to the client/gateway; `online` is the fresh snapshot.
#[must_use]
pub fn should_repush<Id: PartialEq + Clone>(cached: &[Id], online: &[Id]) -> Option<Vec<Id>> {
    let disconnected: Vec<Id> = cached.iter().filter(|c| !online.contains(c)).cloned().collect();
    let should = !disconnected.is_empty() || (cached.len() < 2 && !online.is_empty());
    should.then_some(disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_the_latest_scheduled_timer_fires() {
        let debouncer = Debouncer::new();
        let _stale = debouncer.schedule(Duration::from_millis(5));
        let mut fresh = debouncer.schedule(Duration::from_millis(20));
        let fired = fresh.recv().await.unwrap();
        assert!(debouncer.is_current(fired));
    }

    #[test]
    fn disconnected_ids_trigger_repush() {
        let result = should_repush(&[1, 2], &[1]);
        assert_eq!(result, Some(vec![2]));
    }

    #[test]
    fn under_two_cached_with_online_available_triggers_repush() {
        let result = should_repush(&[1], &[1, 2, 3]);
        assert_eq!(result, Some(vec![]));
    }

    #[test]
    fn stable_full_set_does_not_repush() {
        let result = should_repush(&[1, 2], &[1, 2]);
        assert_eq!(result, None);
    }
}
