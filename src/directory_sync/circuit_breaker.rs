//! Mass-deletion circuit breaker (§4.10 step 3): abort a sync that would
//! wipe out an entire provider's identities or groups rather than apply
//! what's almost certainly a misconfigured or outaged upstream.
//!
//! Decision: the threshold is a full wipe (≥100%), not a softer
//! percentage — a sync that legitimately removed, say, half a provider's
//! users is plausible (an offboarding wave); a sync that would remove all
//! of them almost always means the adapter returned an empty or
//! truncated page, which the softer threshold would block. This is
//! unconditionally skipped on first sync, where there's no baseline to
//! compare against.

#[must_use]
pub fn trips(last_synced_at: Option<chrono::DateTime<chrono::Utc>>, previous_count: usize, planned_deletions: usize) -> bool {
    if last_synced_at.is_none() {
        return false;
    }
    previous_count > 0 && planned_deletions >= previous_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn first_sync_never_trips() {
        assert!(!trips(None, 100, 100));
    }

    #[test]
    fn full_wipe_trips() {
        assert!(trips(Some(Utc::now()), 50, 50));
    }

    #[test]
    fn partial_removal_does_not_trip() {
        assert!(!trips(Some(Utc::now()), 50, 49));
    }

    #[test]
    fn empty_baseline_does_not_trip() {
        assert!(!trips(Some(Utc::now()), 0, 0));
    }
}
