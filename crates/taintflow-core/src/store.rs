//! Label store: bump-allocated, append-only array of label records.
//!
//! Record slots are written exactly once, by the allocating thread, before
//! the id is published; after that only the atomic `flags`/`tree_size`
//! fields ever change. The store itself is therefore freely shared.

use std::io::Write;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering, fence};

use crate::error::{CoreError, fatal};
use crate::label::{CONST_OFFSET, INITIALIZING_LABEL, Label, LabelInfo};

/// Append-only arena of [`LabelInfo`] records indexed by label id.
pub struct LabelStore {
    base: *mut LabelInfo,
    capacity: u32,
    last_label: AtomicU32,
    // Keeps heap-backed stores alive; fixed-region stores borrow memory
    // reserved by the lifecycle layer.
    _backing: Option<Box<[MaybeUninit<LabelInfo>]>>,
}

// SAFETY: slots are written once before their id is published (release fence
// on allocate, acquire fence on get) and are immutable afterwards apart from
// their atomic fields.
unsafe impl Send for LabelStore {}
unsafe impl Sync for LabelStore {}

impl LabelStore {
    /// Heap-backed store holding up to `capacity` records (tests, tools).
    #[must_use]
    pub fn with_heap_capacity(capacity: u32) -> Self {
        let mut backing: Box<[MaybeUninit<LabelInfo>]> = (0..capacity as usize)
            .map(|_| MaybeUninit::zeroed())
            .collect();
        let base = backing.as_mut_ptr().cast::<LabelInfo>();
        let store = Self {
            base,
            capacity,
            last_label: AtomicU32::new(0),
            _backing: Some(backing),
        };
        store.init_const_record();
        store
    }

    /// Store over a reserved region at a fixed address.
    ///
    /// # Safety
    ///
    /// `base` must point to `bytes` bytes of zero-initialized memory that
    /// stays mapped for the life of the store and is used by nothing else.
    pub unsafe fn from_raw_region(base: *mut u8, bytes: usize) -> Result<Self, CoreError> {
        let capacity = bytes / size_of::<LabelInfo>();
        if capacity < CONST_OFFSET as usize + 1 {
            return Err(CoreError::RegionTooSmall(bytes));
        }
        let capacity = u32::try_from(capacity).unwrap_or(INITIALIZING_LABEL - 1);
        let store = Self {
            base: base.cast::<LabelInfo>(),
            capacity,
            last_label: AtomicU32::new(0),
            _backing: None,
        };
        store.init_const_record();
        Ok(store)
    }

    // The constant label is never allocated but its record is read by the
    // propagation slow paths, which treat it as one byte wide.
    fn init_const_record(&self) {
        // SAFETY: slot 0 is in bounds and nothing has published it yet.
        unsafe {
            self.base.write(LabelInfo::input_byte(0));
        }
    }

    /// Number of labels handed out so far.
    #[must_use]
    pub fn last_label(&self) -> Label {
        self.last_label.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reserve the next id and publish `info` under it.
    ///
    /// Aborts the process when the store is exhausted; there is no way to
    /// continue tracing without labels.
    pub fn allocate(&self, info: LabelInfo) -> Label {
        match self.try_allocate(info) {
            Ok(label) => label,
            Err(err) => fatal(err),
        }
    }

    /// Fallible variant of [`allocate`](Self::allocate).
    pub fn try_allocate(&self, info: LabelInfo) -> Result<Label, CoreError> {
        let label = self.last_label.fetch_add(1, Ordering::Relaxed) + 1;
        if label == INITIALIZING_LABEL || label >= self.capacity {
            return Err(CoreError::LabelsExhausted);
        }
        debug_assert!(label > info.l1 && label > info.l2, "sub-labels must predate the union");
        // SAFETY: `label` is in bounds and this thread is the only writer of
        // the slot it just reserved.
        unsafe {
            self.base.add(label as usize).write(info);
        }
        fence(Ordering::Release);
        Ok(label)
    }

    /// Record for a published label.
    #[must_use]
    pub fn get(&self, label: Label) -> &LabelInfo {
        debug_assert!(
            label <= self.last_label(),
            "label {label} read before publication"
        );
        fence(Ordering::Acquire);
        // SAFETY: published labels (and the constant record at 0) are fully
        // written and never moved.
        unsafe { &*self.base.add(label as usize) }
    }

    /// Whether `elem` occurs in the sub-DAG rooted at `label`.
    #[must_use]
    pub fn has_label(&self, label: Label, elem: Label) -> bool {
        if label == elem {
            return true;
        }
        if label == 0 || label == INITIALIZING_LABEL {
            return false;
        }
        let info = self.get(label);
        if info.l1 != 0 && self.has_label(info.l1, elem) {
            return true;
        }
        info.l2 != 0 && self.has_label(info.l2, elem)
    }

    /// Write the diagnostic dump: one `<id> (<l1> <l2> <op> <size>)` line
    /// per allocated label.
    pub fn dump(&self, out: &mut impl Write) -> std::io::Result<()> {
        let last = self.last_label();
        for l in 1..=last {
            let info = self.get(l);
            writeln!(out, "{} ({} {} {} {})", l, info.l1, info.l2, info.op, info.size)?;
        }
        Ok(())
    }
}
