//! Label identifiers and the per-label record.
//!
//! A label is a compact `u32` handle into the label store. `0` is the
//! constant (untainted) label. Input-byte labels are seeded at startup, one
//! per byte of the taint source, before any derived label is allocated, so
//! every derived label is strictly greater than its sub-labels and the
//! expression graph is a DAG in creation order.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use xxhash_rust::xxh32::xxh32;

/// Handle into the label store.
pub type Label = u32;

/// The constant (untainted) label.
pub const CONST_LABEL: Label = 0;

/// Smallest symbolic label. Everything `>= CONST_OFFSET` carries taint.
pub const CONST_OFFSET: Label = 1;

/// Sentinel marking shadow cells whose backing store is still being
/// initialized. Must never escape a well-formed operation.
pub const INITIALIZING_LABEL: Label = u32::MAX;

/// Flag bit: this label's branch has been handed to the solver at least once
/// and must not re-enter it.
pub const B_FLIPPED: u8 = 0x1;

/// Immutable record for one allocated label.
///
/// `flags` and `tree_size` are the only fields touched after publication;
/// both are atomics so the record itself never needs a lock.
#[repr(C)]
#[derive(Debug)]
pub struct LabelInfo {
    /// First sub-label, 0 if unused.
    pub l1: Label,
    /// Second sub-label, 0 if unused.
    pub l2: Label,
    /// Concrete fallback for `l1`; zeroed when `l1` is symbolic. Input-byte
    /// labels carry their file offset here.
    pub op1: u64,
    /// Concrete fallback for `l2`; zeroed when `l2` is symbolic.
    pub op2: u64,
    /// Operator tag; `ICmp` packs its predicate into the high byte.
    pub op: u16,
    /// Result width in bits. 1 is the boolean carrier.
    pub size: u16,
    /// Structural hash, the hash-cons key.
    pub hash: u32,
    flags: AtomicU8,
    tree_size: AtomicU32,
}

impl LabelInfo {
    /// Record for a derived label. The structural hash is filled in by the
    /// caller once the sub-label hashes are known.
    #[must_use]
    pub fn derived(l1: Label, l2: Label, op: u16, size: u16, op1: u64, op2: u64) -> Self {
        Self {
            l1,
            l2,
            op1,
            op2,
            op,
            size,
            hash: 0,
            flags: AtomicU8::new(0),
            tree_size: AtomicU32::new(0),
        }
    }

    /// Record for an input-byte label standing for the byte at `offset`.
    #[must_use]
    pub fn input_byte(offset: u64) -> Self {
        Self {
            l1: 0,
            l2: 0,
            op1: offset,
            op2: 0,
            op: 0,
            size: 8,
            hash: 0,
            flags: AtomicU8::new(0),
            tree_size: AtomicU32::new(0),
        }
    }

    /// Structural equality over the hash-cons key fields.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.l1 == other.l1
            && self.l2 == other.l2
            && self.op == other.op
            && self.size == other.size
            && self.op1 == other.op1
            && self.op2 == other.op2
    }

    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Relaxed)
    }

    pub fn set_flag(&self, flag: u8) {
        self.flags.fetch_or(flag, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_flipped(&self) -> bool {
        self.flags() & B_FLIPPED != 0
    }

    #[must_use]
    pub fn tree_size(&self) -> u32 {
        self.tree_size.load(Ordering::Relaxed)
    }

    pub fn set_tree_size(&self, n: u32) {
        self.tree_size.store(n, Ordering::Relaxed);
    }
}

/// Structural hash over `(h(l1), h(l2), op << 16 | size)`.
///
/// Sub-label hashes stand in for the sub-labels themselves, so the hash of a
/// record summarizes its whole sub-DAG.
#[must_use]
pub fn structural_hash(h1: u32, h2: u32, op: u16, size: u16) -> u32 {
    let h3 = (u32::from(op) << 16) | u32::from(size);
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&h1.to_le_bytes());
    buf[4..8].copy_from_slice(&h2.to_le_bytes());
    buf[8..12].copy_from_slice(&h3.to_le_bytes());
    xxh32(&buf, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op;

    #[test]
    fn input_byte_record_shape() {
        let info = LabelInfo::input_byte(17);
        assert_eq!(info.op, 0);
        assert_eq!(info.op1, 17);
        assert_eq!(info.size, 8);
        assert_eq!(info.l1, 0);
        assert_eq!(info.l2, 0);
    }

    #[test]
    fn same_shape_ignores_memoized_fields() {
        let a = LabelInfo::derived(1, 2, op::ADD, 32, 0, 0);
        let b = LabelInfo::derived(1, 2, op::ADD, 32, 0, 0);
        b.set_flag(B_FLIPPED);
        b.set_tree_size(9);
        assert!(a.same_shape(&b));
    }

    #[test]
    fn same_shape_discriminates_every_key_field() {
        let base = LabelInfo::derived(1, 2, op::ADD, 32, 0, 0);
        assert!(!base.same_shape(&LabelInfo::derived(3, 2, op::ADD, 32, 0, 0)));
        assert!(!base.same_shape(&LabelInfo::derived(1, 3, op::ADD, 32, 0, 0)));
        assert!(!base.same_shape(&LabelInfo::derived(1, 2, op::SUB, 32, 0, 0)));
        assert!(!base.same_shape(&LabelInfo::derived(1, 2, op::ADD, 64, 0, 0)));
        assert!(!base.same_shape(&LabelInfo::derived(1, 2, op::ADD, 32, 7, 0)));
        assert!(!base.same_shape(&LabelInfo::derived(1, 2, op::ADD, 32, 0, 7)));
    }

    #[test]
    fn structural_hash_is_stable_and_sensitive() {
        let h = structural_hash(0xdead, 0xbeef, op::ADD, 32);
        assert_eq!(h, structural_hash(0xdead, 0xbeef, op::ADD, 32));
        assert_ne!(h, structural_hash(0xdead, 0xbeef, op::ADD, 64));
        assert_ne!(h, structural_hash(0xdead, 0xbeef, op::SUB, 32));
        assert_ne!(h, structural_hash(0xbeef, 0xdead, op::ADD, 32));
    }

    #[test]
    fn flag_updates_are_sticky() {
        let info = LabelInfo::derived(1, 2, op::XOR, 8, 0, 0);
        assert!(!info.is_flipped());
        info.set_flag(B_FLIPPED);
        assert!(info.is_flipped());
        info.set_flag(B_FLIPPED);
        assert!(info.is_flipped());
    }
}
