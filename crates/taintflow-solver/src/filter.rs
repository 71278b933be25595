//! Exploration filter: per-site occurrence counting plus cross-run
//! deduplication through the key/value store.
//!
//! The first layer caps how often one branch site (distinguished by the
//! thread's call-stack id) may reach the solver within a run. The second
//! layer hashes `(site, call stack, occurrence order)` and consults the
//! store, so a branch context solved by any previous run is never solved
//! again.

use std::collections::HashMap;

use parking_lot::Mutex;
use xxhash_rust::xxh64::Xxh64;

use crate::kv::KvStore;

/// Occurrence cap per `(call stack, site)` within one execution.
pub const MAX_BRANCH_COUNT: u16 = 16;

/// Per-site branch counters.
#[derive(Default)]
pub struct BranchCounters {
    branches: Mutex<HashMap<(u32, usize), u16>>,
}

impl BranchCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count this occurrence and return its 1-based order, or `None` once
    /// the site is exhausted for the run.
    pub fn record(&self, callstack: u32, site: usize) -> Option<u16> {
        let mut branches = self.branches.lock();
        let count = branches.entry((callstack, site)).or_insert(0);
        if *count >= MAX_BRANCH_COUNT {
            return None;
        }
        *count += 1;
        Some(*count)
    }
}

/// 64-bit context hash of one branch occurrence.
#[must_use]
pub fn context_hash(site: usize, callstack: u32, order: u16) -> u64 {
    let mut state = Xxh64::new(0);
    state.update(&(site as u64).to_le_bytes());
    state.update(&u64::from(callstack).to_le_bytes());
    state.update(&u32::from(order).to_le_bytes());
    state.digest()
}

/// Consult and update the cross-run store. Returns whether this context is
/// new and should be explored.
pub fn should_explore(kv: &dyn KvStore, program: &str, hash: u64) -> bool {
    let key = format!("{hash}{program}");
    if kv.get(&key).is_some() {
        tracing::debug!(hash, "branch context already explored");
        return false;
    }
    kv.set(&key, "explored");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[test]
    fn orders_are_one_based_and_capped() {
        let counters = BranchCounters::new();
        for expected in 1..=MAX_BRANCH_COUNT {
            assert_eq!(counters.record(7, 0x4000), Some(expected));
        }
        for _ in 0..4 {
            assert_eq!(counters.record(7, 0x4000), None, "cap must hold");
        }
    }

    #[test]
    fn sites_count_independently() {
        let counters = BranchCounters::new();
        assert_eq!(counters.record(7, 0x4000), Some(1));
        assert_eq!(counters.record(7, 0x4004), Some(1));
        // A different call stack makes it a different site.
        assert_eq!(counters.record(8, 0x4000), Some(1));
        assert_eq!(counters.record(7, 0x4000), Some(2));
    }

    #[test]
    fn context_hash_distinguishes_every_component() {
        let h = context_hash(0x4000, 7, 1);
        assert_eq!(h, context_hash(0x4000, 7, 1));
        assert_ne!(h, context_hash(0x4004, 7, 1));
        assert_ne!(h, context_hash(0x4000, 8, 1));
        assert_ne!(h, context_hash(0x4000, 7, 2));
    }

    #[test]
    fn second_visit_is_filtered() {
        let kv = MemoryStore::default();
        let h = context_hash(0x4000, 7, 1);
        assert!(should_explore(&kv, "prog", h));
        assert!(!should_explore(&kv, "prog", h));
        // Same hash under a different program name is a different key.
        assert!(should_explore(&kv, "other", h));
    }
}
