//! Hybrid logical clock for ordering presence updates across cluster nodes.
//!
//! A pure Lamport clock is enough for happens-before ordering but gives no
//! wall-clock meaning, which presence entries need (`online_at` is shown to
//! operators). A pure wall clock breaks ties non-deterministically when two
//! nodes write within the same millisecond. This combines both: wall-clock
//! millis first, a logical counter to break same-millisecond ties, and the
//! originating node id to break same-counter ties deterministically.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    millis: u64,
    counter: u32,
    node: ServerId,
}

impl HybridTimestamp {
    #[must_use]
    pub const fn new(millis: u64, counter: u32, node: ServerId) -> Self {
        Self { millis, counter, node }
    }

    #[must_use]
    pub const fn millis(&self) -> u64 {
        self.millis
    }

    #[must_use]
    pub const fn node(&self) -> ServerId {
        self.node
    }

    /// Produce the next timestamp for a local event given the wall clock
    /// reading `now_millis`. If `now_millis` has not advanced past the
    /// previous stamp, the counter ticks instead so ordering never goes
    /// backwards.
    #[must_use]
    pub fn tick(&self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self { millis: now_millis, counter: 0, node: self.node }
        } else {
            Self { millis: self.millis, counter: self.counter + 1, node: self.node }
        }
    }

    #[must_use]
    pub const fn zero(node: ServerId) -> Self {
        Self { millis: 0, counter: 0, node }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_forward_with_wall_clock() {
        let t0 = HybridTimestamp::zero(ServerId(1));
        let t1 = t0.tick(100);
        assert_eq!(t1.millis, 100);
        assert_eq!(t1.counter, 0);
        assert!(t1 > t0);
    }

    #[test]
    fn same_millis_bumps_counter() {
        let t0 = HybridTimestamp::new(100, 0, ServerId(1));
        let t1 = t0.tick(100);
        assert_eq!(t1.millis, 100);
        assert_eq!(t1.counter, 1);
        assert!(t1 > t0);
    }

    #[test]
    fn node_id_breaks_ties() {
        let a = HybridTimestamp::new(100, 0, ServerId(1));
        let b = HybridTimestamp::new(100, 0, ServerId(2));
        assert!(a < b);
    }

    #[test]
    fn ordering_is_total() {
        let a = HybridTimestamp::new(100, 5, ServerId(9));
        let b = HybridTimestamp::new(101, 0, ServerId(1));
        assert!(a < b);
    }
}
