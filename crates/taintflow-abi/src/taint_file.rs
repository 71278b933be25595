//! Taint-file bookkeeping surface for the libc interceptors.
//!
//! The interceptors (outside this crate) call these when the traced program
//! opens, reads, or closes files, so the runtime knows which descriptor
//! currently refers to the tainted input.

use std::ffi::{CStr, c_char};

use taintflow_core::label::Label;

use crate::state::try_runtime;

fn path_of(filename: *const c_char) -> Option<String> {
    if filename.is_null() {
        return None;
    }
    // SAFETY: interceptors pass NUL-terminated paths.
    Some(unsafe { CStr::from_ptr(filename) }.to_string_lossy().into_owned())
}

/// The traced program opened `filename` as `fd`; adopt it if it is the
/// taint file.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taint_set_file(filename: *const c_char, fd: i32) {
    let Some(rt) = try_runtime() else { return };
    let Some(path) = path_of(filename) else { return };
    if rt.input().matches_path(&path) {
        tracing::debug!(fd, "taint file opened");
        rt.input().set_fd(fd);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn is_taint_file(filename: *const c_char) -> i32 {
    let Some(rt) = try_runtime() else { return 0 };
    let Some(path) = path_of(filename) else { return 0 };
    i32::from(rt.input().matches_path(&path))
}

/// Size of the taint file when `fd` refers to it, 0 otherwise.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taint_get_file(fd: i32) -> i64 {
    try_runtime().map_or(0, |rt| rt.input().size_for_fd(fd) as i64)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn taint_close_file(fd: i32) {
    if let Some(rt) = try_runtime() {
        rt.input().close_fd(fd);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn is_stdin_taint() -> i32 {
    try_runtime().is_some_and(|rt| rt.input().is_stdin()).into()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn is_utmp_taint() -> i32 {
    try_runtime().is_some_and(|rt| rt.input().is_utmp()).into()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn set_utmp_offset(offset: i64) {
    if let Some(rt) = try_runtime() {
        rt.input().set_utmp_offset(offset);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_utmp_offset() -> i64 {
    try_runtime().map_or(0, |rt| rt.input().utmp_offset())
}

/// Record-based interceptors stash the label of the current record offset
/// here between calls.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taint_set_offset_label(label: Label) {
    if let Some(rt) = try_runtime() {
        rt.input().set_offset_label(label);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn taint_get_offset_label() -> Label {
    try_runtime().map_or(0, |rt| rt.input().offset_label())
}
