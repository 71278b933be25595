//! The assembled taint runtime: label store, hash-cons table, taint source.
//!
//! One instance exists per traced process, built by the ABI lifecycle layer
//! over the reserved fixed-address regions. Tests build heap-backed
//! instances freely.

use std::io::Write;

use crate::error::fatal;
use crate::input::TaintSource;
use crate::label::{INITIALIZING_LABEL, Label, LabelInfo};
use crate::store::LabelStore;
use crate::table::UnionTable;

pub struct TaintRuntime {
    store: LabelStore,
    table: UnionTable,
    input: TaintSource,
}

impl TaintRuntime {
    /// Assemble a runtime and seed one input-byte label per byte of the
    /// taint source.
    ///
    /// Seeding happens before any derived label can exist, so input-byte
    /// labels occupy `1..=input.size()` in file-offset order.
    #[must_use]
    pub fn new(store: LabelStore, table: UnionTable, input: TaintSource) -> Self {
        let rt = Self { store, table, input };
        // A true pipe has no stable byte offsets to name; nothing to seed.
        if !rt.input.is_stdin() {
            for offset in 0..rt.input.size() {
                let label = rt.create_input_label(offset as u64);
                debug_assert_eq!(label as usize, offset + 1);
            }
        }
        rt
    }

    /// Heap-backed runtime used by tests and tools.
    #[must_use]
    pub fn with_heap_storage(label_capacity: u32, input: TaintSource) -> Self {
        Self::new(
            LabelStore::with_heap_capacity(label_capacity),
            UnionTable::with_heap_capacity(crate::table::UNION_TABLE_SIZE.min(1 << 12)),
            input,
        )
    }

    /// Allocate a fresh input-byte label for `offset`. Aborts on
    /// exhaustion, like every other allocation.
    pub fn create_input_label(&self, offset: u64) -> Label {
        let label = self.store.allocate(LabelInfo::input_byte(offset));
        if label == INITIALIZING_LABEL {
            fatal("out of labels");
        }
        label
    }

    #[must_use]
    pub fn store(&self) -> &LabelStore {
        &self.store
    }

    #[must_use]
    pub fn table(&self) -> &UnionTable {
        &self.table
    }

    #[must_use]
    pub fn input(&self) -> &TaintSource {
        &self.input
    }

    #[must_use]
    pub fn label_count(&self) -> u32 {
        self.store.last_label()
    }

    #[must_use]
    pub fn has_label(&self, label: Label, elem: Label) -> bool {
        self.store.has_label(label, elem)
    }

    /// Diagnostic dump of every allocated label.
    pub fn dump_labels(&self, out: &mut impl Write) -> std::io::Result<()> {
        self.store.dump(out)
    }
}
