//! Label propagation exports.
//!
//! `__taint_*` symbols are the compiler-facing surface; `dfsan_*` symbols
//! are the client surface usable from custom wrappers in the traced
//! program. Both delegate to the engine in `taintflow-core`; before init
//! has run every operation degrades to "untainted".

use std::ffi::c_void;
use std::slice;

use taintflow_core::label::{CONST_LABEL, Label};
use taintflow_core::shadow::{self, shadow_for};
use taintflow_core::TaintRuntime;

use crate::state::try_runtime;

#[inline]
fn with_runtime<R: Default>(f: impl FnOnce(&'static TaintRuntime) -> R) -> R {
    try_runtime().map(f).unwrap_or_default()
}

/// Shadow cells and the application bytes they mirror.
///
/// # Safety
///
/// `ls` must point into the shadow region with `n` live cells.
unsafe fn shadow_slices<'a>(ls: *const Label, n: usize) -> (&'a [Label], &'a [u8]) {
    // SAFETY: caller contract; the app range backing a mapped shadow range
    // is readable by construction of the layout.
    unsafe {
        let labels = slice::from_raw_parts(ls, n);
        let bytes = slice::from_raw_parts(shadow::app_for(ls as usize) as *const u8, n);
        (labels, bytes)
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_union(
    l1: Label,
    l2: Label,
    op: u16,
    size: u16,
    op1: u64,
    op2: u64,
) -> Label {
    with_runtime(|rt| rt.union(l1, l2, op, size, op1, op2))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_union_load(ls: *const Label, n: usize) -> Label {
    if ls.is_null() || n == 0 {
        return CONST_LABEL;
    }
    with_runtime(|rt| {
        // SAFETY: the instrumentation passes the shadow address of a live
        // n-byte application range.
        let (labels, bytes) = unsafe { shadow_slices(ls, n) };
        rt.union_load(labels, bytes)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_union_store(l: Label, ls: *mut Label, n: usize) {
    if ls.is_null() || n == 0 {
        return;
    }
    let Some(rt) = try_runtime() else { return };
    // SAFETY: as for loads; stores own the cells for the duration.
    let cells = unsafe { slice::from_raw_parts_mut(ls, n) };
    rt.union_store(l, cells);
}

/// Bulk-mark an application range with one label.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dfsan_set_label(label: Label, addr: *mut c_void, size: usize) {
    if addr.is_null() || size == 0 {
        return;
    }
    // SAFETY: `addr` is a live application range; its shadow is mapped.
    let cells = unsafe { slice::from_raw_parts_mut(shadow_for(addr as usize) as *mut Label, size) };
    shadow::set_label_cells(label, cells);
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_set_label(label: Label, addr: *mut c_void, size: usize) {
    // SAFETY: forwarded contract.
    unsafe { __dfsan_set_label(label, addr, size) }
}

/// Store a computed label over a range, distributing per-byte.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_store_label(l: Label, addr: *mut c_void, size: usize) {
    if l == CONST_LABEL || addr.is_null() || size == 0 {
        return;
    }
    let Some(rt) = try_runtime() else { return };
    // SAFETY: as for `__dfsan_set_label`.
    let cells = unsafe { slice::from_raw_parts_mut(shadow_for(addr as usize) as *mut Label, size) };
    rt.union_store(l, cells);
}

/// Client-side union, identical to the compiler-facing one.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_union(
    l1: Label,
    l2: Label,
    op: u16,
    size: u16,
    op1: u64,
    op2: u64,
) -> Label {
    with_runtime(|rt| rt.union(l1, l2, op, size, op1, op2))
}

/// Fold `label` into every byte of a range under `op`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_add_label(label: Label, op: u16, addr: *mut c_void, size: usize) {
    if addr.is_null() || size == 0 {
        return;
    }
    let Some(rt) = try_runtime() else { return };
    // SAFETY: as for `__dfsan_set_label`.
    let cells = unsafe { slice::from_raw_parts_mut(shadow_for(addr as usize) as *mut Label, size) };
    for cell in cells {
        *cell = rt.union(*cell, label, op, 1, 0, 0);
    }
}

/// Fresh input-byte label for a file offset (interceptor surface).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_create_label(offset: i64) -> Label {
    with_runtime(|rt| rt.create_input_label(offset as u64))
}

/// Label of one application byte.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_get_label(addr: *const c_void) -> Label {
    if addr.is_null() {
        return CONST_LABEL;
    }
    // SAFETY: a mapped application byte always has a mapped shadow cell.
    unsafe { *(shadow_for(addr as usize) as *const Label) }
}

/// Combined label of an application range.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_read_label(addr: *const c_void, size: usize) -> Label {
    if addr.is_null() || size == 0 {
        return CONST_LABEL;
    }
    with_runtime(|rt| {
        // SAFETY: as for `__taint_union_load`.
        let (labels, bytes) = unsafe { shadow_slices(shadow_for(addr as usize) as *const Label, size) };
        rt.union_load(labels, bytes)
    })
}

/// Whether `elem` occurs in `label`'s sub-DAG.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_has_label(label: Label, elem: Label) -> i32 {
    i32::from(with_runtime(|rt| rt.has_label(label, elem)))
}

/// Number of labels allocated so far.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_get_label_count() -> usize {
    with_runtime(|rt| rt.label_count() as usize)
}

/// Write the label dump to an open descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dfsan_dump_labels(fd: i32) {
    use std::io::Write;
    use std::os::fd::FromRawFd;
    let Some(rt) = try_runtime() else { return };
    // SAFETY: the caller owns `fd`; ManuallyDrop keeps us from closing it.
    let mut file = std::mem::ManuallyDrop::new(unsafe { std::fs::File::from_raw_fd(fd) });
    if let Err(err) = rt.dump_labels(&mut *file) {
        tracing::warn!(%err, "label dump failed");
    }
    let _ = file.flush();
}

/// Custom wrapper for `dfsan_get_label` calls inside the traced program:
/// the result depends on an argument's label, so the compiler routes it
/// here.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dfsw_dfsan_get_label(
    _data: i64,
    data_label: Label,
    ret_label: *mut Label,
) -> Label {
    if !ret_label.is_null() {
        // SAFETY: instrumentation passes the address of a live TLS slot.
        unsafe { *ret_label = 0 };
    }
    data_label
}
