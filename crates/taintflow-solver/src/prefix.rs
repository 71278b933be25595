//! Rolling path-prefix observer.
//!
//! Folds every executed branch into a streaming hash of the path so far,
//! and for tainted branches also produces the hash of the path that *would*
//! have been taken. Purely observational: nothing here feeds back into
//! filtering or solving.

use xxhash_rust::xxh64::Xxh64;

pub struct PathPrefixObserver {
    taken: Xxh64,
    taken_hash: u64,
    untaken_hash: u64,
}

impl Default for PathPrefixObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathPrefixObserver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            taken: Xxh64::new(0),
            taken_hash: 0,
            untaken_hash: 0,
        }
    }

    /// Fold in one branch occurrence. Deterministic (untainted) branches
    /// only extend the taken stream; tainted ones also snapshot the
    /// untaken direction.
    pub fn record(&mut self, site: u64, deterministic: bool, taken: bool) {
        self.taken.update(&site.to_le_bytes());
        self.taken.update(&[u8::from(deterministic)]);
        if deterministic {
            self.taken.update(&[u8::from(taken)]);
            return;
        }
        let mut untaken = self.taken.clone();
        self.taken.update(&[u8::from(taken)]);
        untaken.update(&[u8::from(!taken)]);
        self.taken_hash = self.taken.digest();
        self.untaken_hash = untaken.digest();
    }

    /// Hash of the path actually executed, as of the last tainted branch.
    #[must_use]
    pub fn taken_hash(&self) -> u64 {
        self.taken_hash
    }

    /// Hash of the sibling path flipping the last tainted branch.
    #[must_use]
    pub fn untaken_hash(&self) -> u64 {
        self.untaken_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_paths_hash_identically() {
        let mut a = PathPrefixObserver::new();
        let mut b = PathPrefixObserver::new();
        for obs in [&mut a, &mut b] {
            obs.record(0x4000, true, true);
            obs.record(0x4010, false, true);
        }
        assert_eq!(a.taken_hash(), b.taken_hash());
        assert_eq!(a.untaken_hash(), b.untaken_hash());
    }

    #[test]
    fn sibling_paths_diverge() {
        let mut a = PathPrefixObserver::new();
        let mut b = PathPrefixObserver::new();
        a.record(0x4010, false, true);
        b.record(0x4010, false, false);
        assert_ne!(a.taken_hash(), b.taken_hash());
        // Each stream's untaken twin is the other stream's taken path.
        assert_eq!(a.untaken_hash(), b.taken_hash());
        assert_eq!(b.untaken_hash(), a.taken_hash());
    }

    #[test]
    fn deterministic_branches_extend_without_snapshotting() {
        let mut obs = PathPrefixObserver::new();
        obs.record(0x4010, false, true);
        let (t, u) = (obs.taken_hash(), obs.untaken_hash());
        obs.record(0x4020, true, false);
        // Snapshots only move on tainted branches.
        assert_eq!(obs.taken_hash(), t);
        assert_eq!(obs.untaken_hash(), u);
    }
}
