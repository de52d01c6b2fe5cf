//! Last-Writer-Wins register, generic over the clock used to order writes.

use crate::clock::HybridTimestamp;
use crate::traits::Mergeable;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    stamp: HybridTimestamp,
}

impl<T> LwwRegister<T> {
    #[must_use]
    pub const fn new(value: T, stamp: HybridTimestamp) -> Self {
        Self { value, stamp }
    }

    #[must_use]
    pub const fn get(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub const fn stamp(&self) -> HybridTimestamp {
        self.stamp
    }

    /// Apply a write if `stamp` is newer than the current one. Returns
    /// `true` if applied.
    pub fn set(&mut self, value: T, stamp: HybridTimestamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Clone> Mergeable for LwwRegister<T> {
    fn merge(&mut self, other: &Self) -> bool {
        if other.stamp > self.stamp {
            self.value = other.value.clone();
            self.stamp = other.stamp;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ServerId;

    #[test]
    fn higher_stamp_wins_on_merge() {
        let mut a = LwwRegister::new("a", HybridTimestamp::new(1, 0, ServerId(1)));
        let b = LwwRegister::new("b", HybridTimestamp::new(2, 0, ServerId(1)));
        assert!(a.merge(&b));
        assert_eq!(*a.get(), "b");
    }

    #[test]
    fn lower_stamp_is_ignored() {
        let mut a = LwwRegister::new("a", HybridTimestamp::new(5, 0, ServerId(1)));
        let b = LwwRegister::new("b", HybridTimestamp::new(2, 0, ServerId(1)));
        assert!(!a.merge(&b));
        assert_eq!(*a.get(), "a");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = LwwRegister::new("a", HybridTimestamp::new(1, 0, ServerId(1)));
        let b = LwwRegister::new("b", HybridTimestamp::new(2, 0, ServerId(1)));
        a.merge(&b);
        let changed = a.merge(&b);
        assert!(!changed);
        assert_eq!(*a.get(), "b");
    }
}
