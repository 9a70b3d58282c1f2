//! Time-bounded membership set.

use std::collections::HashMap;
use std::hash::Hash;

/// Keys remembered for `horizon` seconds of chain time after insertion.
///
/// Used to avoid re-settling a request whose settlement has not yet shown up
/// in the contract's view.
#[derive(Debug, Clone)]
pub struct TtlSet<K> {
    horizon: u64,
    entries: HashMap<K, u64>,
}

impl<K: Eq + Hash + Clone> TtlSet<K> {
    pub fn new(horizon_secs: u64) -> Self {
        Self {
            horizon: horizon_secs,
            entries: HashMap::new(),
        }
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Record `key` at time `now`, replacing any earlier timestamp.
    pub fn insert(&mut self, key: K, now: u64) {
        self.entries.insert(key, now);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn inserted_at(&self, key: &K) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Drop entries older than the horizon. An entry exactly `horizon`
    /// seconds old is kept.
    pub fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.horizon);
        self.entries.retain(|_, at| *at >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_boundary_entry() {
        let mut set = TtlSet::new(300);
        set.insert("a", 1_000);
        set.prune(1_300);
        assert!(set.contains(&"a"));
        set.prune(1_301);
        assert!(!set.contains(&"a"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_reinsert_refreshes_timestamp() {
        let mut set = TtlSet::new(10);
        set.insert(1u8, 0);
        set.insert(1u8, 50);
        set.prune(55);
        assert_eq!(set.inserted_at(&1), Some(50));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_prune_before_horizon_elapses_keeps_all() {
        let mut set = TtlSet::new(300);
        set.insert("a", 5);
        set.insert("b", 100);
        set.prune(200);
        assert_eq!(set.len(), 2);
    }
}
