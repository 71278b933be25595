//! The propagation protocol: `union`, `union_load`, `union_store`.
//!
//! These are the hot callbacks injected at every value-propagating
//! instruction of the traced program. Each tries hard to avoid allocating:
//! constants short-circuit, loads of untouched input bytes collapse to a
//! single `Load` node, and stores of previously-loaded values write back
//! the original per-byte labels.

use crate::label::{CONST_LABEL, CONST_OFFSET, INITIALIZING_LABEL, Label, LabelInfo, structural_hash};
use crate::op;
use crate::runtime::TaintRuntime;

impl TaintRuntime {
    /// Combine two labels under `op`, hash-consing the result.
    ///
    /// `op1`/`op2` carry the concrete operand values for sides that are not
    /// symbolic; they are zeroed for symbolic sides so structurally equal
    /// records unify regardless of what happened to be in the registers.
    pub fn union(
        &self,
        mut l1: Label,
        mut l2: Label,
        op: u16,
        size: u16,
        mut op1: u64,
        mut op2: u64,
    ) -> Label {
        if l1 > l2 && op::is_commutative(op) {
            std::mem::swap(&mut l1, &mut l2);
            std::mem::swap(&mut op1, &mut op2);
        }
        // Two concrete operands make a concrete result; only fsize exists
        // without symbolic inputs.
        if l1 == 0 && l2 < CONST_OFFSET && op != op::FSIZE {
            return CONST_LABEL;
        }
        if l1 == INITIALIZING_LABEL || l2 == INITIALIZING_LABEL {
            return INITIALIZING_LABEL;
        }

        if l1 >= CONST_OFFSET {
            op1 = 0;
        }
        if l2 >= CONST_OFFSET {
            op2 = 0;
        }

        let mut info = LabelInfo::derived(l1, l2, op, size, op1, op2);
        let h1 = if l1 != 0 { self.store().get(l1).hash } else { 0 };
        let h2 = if l2 != 0 { self.store().get(l2).hash } else { 0 };
        info.hash = structural_hash(h1, h2, op, size);
        let label = self.table().intern(self.store(), info);
        tracing::trace!(label, l1, l2, op, size, "union");
        label
    }

    /// Combine `ls.len()` contiguous shadow cells into one label for a
    /// little-endian value of that many bytes. `bytes` are the concrete
    /// application bytes backing the same range, used to fold constants.
    pub fn union_load(&self, ls: &[Label], bytes: &[u8]) -> Label {
        let n = ls.len();
        debug_assert_eq!(n, bytes.len());
        debug_assert!(n > 0);
        let label0 = ls[0];
        if label0 == INITIALIZING_LABEL {
            return INITIALIZING_LABEL;
        }
        if label0 >= CONST_OFFSET {
            debug_assert_ne!(self.store().get(label0).size, 0);
        }

        // Fast path 1: nothing here is tainted.
        if label0 == CONST_LABEL && ls.iter().all(|&l| l == CONST_LABEL) {
            return CONST_LABEL;
        }

        if let Some(label) = self.load_shape(ls, bytes) {
            return label;
        }
        if let Some(label) = self.load_common_extract(ls) {
            return label;
        }
        self.load_slowpath(ls, bytes)
    }

    /// Fast path 2: consecutive input bytes (with optional trailing
    /// constants) collapse to one `Load`, plus `Concat`s folding the
    /// constant tail.
    fn load_shape(&self, ls: &[Label], bytes: &[u8]) -> Option<Label> {
        let n = ls.len();
        let label0 = ls[0];
        if label0 == CONST_LABEL || self.store().get(label0).op != 0 {
            return None;
        }
        let offset = self.store().get(label0).op1;
        let mut tail_consts = 0usize;
        for (i, &next) in ls.iter().enumerate().skip(1) {
            if next == INITIALIZING_LABEL {
                return Some(INITIALIZING_LABEL);
            }
            if next == CONST_LABEL {
                tail_consts += 1;
                continue;
            }
            // A symbolic cell after a constant breaks the shape, as does
            // anything that is not the input byte at the next file offset.
            let info = self.store().get(next);
            if tail_consts != 0 || info.op != 0 || info.op1 != offset + i as u64 {
                return None;
            }
        }
        if n == 1 {
            return Some(label0);
        }
        let load_size = n - tail_consts;
        let mut ret = label0;
        if load_size > 1 {
            ret = self.union(
                label0,
                load_size as Label,
                op::LOAD,
                (load_size * 8) as u16,
                0,
                0,
            );
        }
        for i in 0..tail_consts {
            ret = self.union(
                ret,
                0,
                op::CONCAT,
                ((load_size + i + 1) * 8) as u16,
                0,
                u64::from(bytes[load_size + i]),
            );
        }
        Some(ret)
    }

    /// Fast path 3: every cell extracts from the same parent at
    /// consecutive bit offsets covering its full width; return the parent.
    fn load_common_extract(&self, ls: &[Label]) -> Option<Label> {
        let label0 = ls[0];
        if label0 == CONST_LABEL || self.store().get(label0).op != op::EXTRACT {
            return None;
        }
        let parent = self.store().get(label0).l1;
        let mut offset = 0u64;
        for &l in ls {
            if l == CONST_LABEL || l == INITIALIZING_LABEL {
                return None;
            }
            let info = self.store().get(l);
            if info.op != op::EXTRACT || info.op2 != offset || info.l1 != parent {
                return None;
            }
            offset += u64::from(info.size);
        }
        (u64::from(self.store().get(parent).size) == offset).then(|| {
            tracing::trace!(parent, "load collapsed to extract parent");
            parent
        })
    }

    /// Slow path: concatenate whole sub-labels, truncating one that
    /// overhangs the range and absorbing concrete cells by value.
    fn load_slowpath(&self, ls: &[Label], bytes: &[u8]) -> Label {
        let n = ls.len();
        let label0 = ls[0];
        let mut label = label0;
        let mut i = (self.store().get(label0).size as usize / 8).max(1);
        while i < n {
            let next = ls[i];
            if next == CONST_LABEL {
                tracing::warn!(at = i, "load mixes taint with concrete bytes");
                let c = bytes[i];
                i += 1;
                label = self.union(label, 0, op::CONCAT, (i * 8) as u16, 0, u64::from(c));
                continue;
            }
            let next_size = self.store().get(next).size as usize;
            if next_size <= (n - i) * 8 {
                i += next_size / 8;
                label = self.union(label, next, op::CONCAT, (i * 8) as u16, 0, 0);
            } else {
                tracing::warn!(
                    expected = n - i,
                    has = next_size / 8,
                    "partial load of a wider label"
                );
                let rest = n - i;
                let trunc = self.union(next, CONST_LABEL, op::TRUNC, (rest * 8) as u16, 0, 0);
                return self.union(label, trunc, op::CONCAT, (n * 8) as u16, 0, 0);
            }
        }
        label
    }

    /// Distribute a width-`8·ls.len()` label across `ls.len()` shadow
    /// cells.
    pub fn union_store(&self, l: Label, ls: &mut [Label]) {
        let n = ls.len();
        if l == INITIALIZING_LABEL || l == CONST_LABEL {
            ls.fill(l);
            return;
        }
        debug_assert!(l <= self.store().last_label());

        let (l1, l2, op_, size) = {
            let info = self.store().get(l);
            (info.l1, info.l2, info.op, info.size)
        };

        // Single byte.
        if n == 1 && size == 8 {
            ls[0] = l;
            return;
        }

        // A loaded value stores back as the original input-byte labels.
        if op_ == op::LOAD {
            if n as u32 > l2 {
                tracing::warn!(store = n, load = l2, "store wider than originating load");
            }
            for (i, cell) in ls.iter_mut().enumerate() {
                *cell = l1 + i as Label;
            }
            return;
        }

        // Concatenations split along their seam.
        if op_ == op::CONCAT && n * 8 == size as usize {
            let high_bytes = self.store().get(l2).size as usize / 8;
            if high_bytes <= n {
                let (base, high) = ls.split_at_mut(n - high_bytes);
                self.union_store(l2, high);
                self.union_store(l1, base);
                return;
            }
        }

        // Zero extensions over byte-aligned bases store the base and zero
        // the rest.
        if op_ == op::ZEXT {
            let base_size = self.store().get(l1).size as usize;
            if base_size % 8 == 0 && base_size / 8 <= n {
                let base_bytes = base_size / 8;
                ls[base_bytes..].fill(CONST_LABEL);
                self.union_store(l1, &mut ls[..base_bytes]);
                return;
            }
        }

        // Fallback: one byte-wide extract per cell.
        for (i, cell) in ls.iter_mut().enumerate() {
            *cell = self.union(l, CONST_LABEL, op::EXTRACT, 8, 0, (i * 8) as u64);
        }
    }
}
