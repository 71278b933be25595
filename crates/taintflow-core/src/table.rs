//! Hash-cons table for label records.
//!
//! A fixed-capacity, open-addressed table keyed by the structural hash.
//! Interning holds one coarse lock across probe and allocation so that two
//! threads racing on an identical record always agree on its id. Probe
//! chains are capped; a full neighborhood simply falls through to plain
//! allocation, trading a little deduplication for bounded work.

use parking_lot::Mutex;

use crate::label::{CONST_LABEL, Label, LabelInfo};
use crate::store::LabelStore;

/// Slots in the table; matches the reserved hash-table region.
pub const UNION_TABLE_SIZE: usize = 1 << 18;

/// Longest probe chain before giving up on deduplication.
const MAX_PROBE: usize = 32;

struct Slots {
    base: *mut Label,
    len: usize,
    _backing: Option<Box<[Label]>>,
}

// SAFETY: the slot array is only touched under the table mutex.
unsafe impl Send for Slots {}

/// Deduplicating allocator over a [`LabelStore`].
pub struct UnionTable {
    slots: Mutex<Slots>,
}

impl UnionTable {
    /// Heap-backed table (tests, tools).
    #[must_use]
    pub fn with_heap_capacity(len: usize) -> Self {
        let mut backing = vec![CONST_LABEL; len].into_boxed_slice();
        let base = backing.as_mut_ptr();
        Self {
            slots: Mutex::new(Slots {
                base,
                len,
                _backing: Some(backing),
            }),
        }
    }

    /// Table over a reserved region at a fixed address.
    ///
    /// # Safety
    ///
    /// `base` must point to `bytes` bytes of zero-initialized memory that
    /// stays mapped for the life of the table and is used by nothing else.
    #[must_use]
    pub unsafe fn from_raw_region(base: *mut u8, bytes: usize) -> Self {
        let len = (bytes / size_of::<Label>()).min(UNION_TABLE_SIZE);
        Self {
            slots: Mutex::new(Slots {
                base: base.cast::<Label>(),
                len,
                _backing: None,
            }),
        }
    }

    /// Return the id of a record structurally equal to `info`, or allocate
    /// and remember it. `info.hash` must already be filled in.
    pub fn intern(&self, store: &LabelStore, info: LabelInfo) -> Label {
        let slots = self.slots.lock();
        let mut free: Option<usize> = None;
        let start = info.hash as usize % slots.len;
        for i in 0..MAX_PROBE.min(slots.len) {
            let idx = (start + i) % slots.len;
            // SAFETY: idx < slots.len and we hold the lock.
            let occupant = unsafe { *slots.base.add(idx) };
            if occupant == CONST_LABEL {
                free = Some(idx);
                break;
            }
            if store.get(occupant).same_shape(&info) {
                tracing::trace!(label = occupant, "union hash-cons hit");
                return occupant;
            }
        }
        let label = store.allocate(info);
        if let Some(idx) = free {
            // SAFETY: idx < slots.len and we hold the lock.
            unsafe { slots.base.add(idx).write(label) };
        }
        // A full neighborhood leaves the record un-consed; later equal
        // records allocate fresh ids, which only costs store space.
        label
    }

    /// Probe without inserting. Used by diagnostics and tests.
    #[must_use]
    pub fn lookup(&self, store: &LabelStore, info: &LabelInfo) -> Option<Label> {
        let slots = self.slots.lock();
        let start = info.hash as usize % slots.len;
        for i in 0..MAX_PROBE.min(slots.len) {
            let idx = (start + i) % slots.len;
            // SAFETY: idx < slots.len and we hold the lock.
            let occupant = unsafe { *slots.base.add(idx) };
            if occupant == CONST_LABEL {
                return None;
            }
            if store.get(occupant).same_shape(info) {
                return Some(occupant);
            }
        }
        None
    }
}

/// Bytes needed for a full-size table region.
#[must_use]
pub const fn table_region_bytes() -> usize {
    UNION_TABLE_SIZE * size_of::<Label>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::structural_hash;
    use crate::op;

    fn hashed(l1: Label, l2: Label, op_: u16, size: u16) -> LabelInfo {
        let mut info = LabelInfo::derived(l1, l2, op_, size, 0, 0);
        info.hash = structural_hash(0, 0, op_, size);
        info
    }

    #[test]
    fn equal_records_intern_to_one_id() {
        let store = LabelStore::with_heap_capacity(128);
        let table = UnionTable::with_heap_capacity(64);
        let a = table.intern(&store, hashed(0, 0, op::FSIZE, 32));
        let b = table.intern(&store, hashed(0, 0, op::FSIZE, 32));
        assert_eq!(a, b);
        assert_eq!(store.last_label(), 1);
    }

    #[test]
    fn distinct_records_never_alias() {
        let store = LabelStore::with_heap_capacity(128);
        let table = UnionTable::with_heap_capacity(64);
        let a = table.intern(&store, hashed(0, 0, op::FSIZE, 32));
        let b = table.intern(&store, hashed(0, 0, op::FSIZE, 64));
        assert_ne!(a, b);
    }

    #[test]
    fn lookup_sees_only_interned_records() {
        let store = LabelStore::with_heap_capacity(128);
        let table = UnionTable::with_heap_capacity(64);
        let probe = hashed(0, 0, op::FSIZE, 16);
        assert_eq!(table.lookup(&store, &probe), None);
        let id = table.intern(&store, hashed(0, 0, op::FSIZE, 16));
        assert_eq!(table.lookup(&store, &probe), Some(id));
    }

    #[test]
    fn colliding_hashes_fall_through_to_fresh_ids() {
        let store = LabelStore::with_heap_capacity(4096);
        // A one-slot table: the second distinct record can never be consed,
        // but it must still get its own id.
        let table = UnionTable::with_heap_capacity(1);
        let a = table.intern(&store, hashed(0, 0, op::FSIZE, 8));
        let b = table.intern(&store, hashed(0, 0, op::FSIZE, 16));
        let c = table.intern(&store, hashed(0, 0, op::FSIZE, 16));
        assert_ne!(a, b);
        assert_ne!(b, c, "uncached records allocate fresh ids");
    }
}
