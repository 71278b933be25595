//! Error kinds and the fatal-abort path.
//!
//! Fatal conditions mirror the runtime contract: the traced process cannot
//! continue once labels are exhausted or a region failed to map, so they
//! report and abort. Everything else is surfaced as a [`CoreError`] and the
//! current operation is skipped by the caller.

use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("out of labels")]
    LabelsExhausted,
    #[error("label region too small for one record: {0} bytes")]
    RegionTooSmall(usize),
    #[error("invalid label: {0}")]
    InvalidLabel(u32),
    #[error("taint source is stdin and cannot be re-synthesized")]
    StdinSource,
    #[error("no taint source configured")]
    NoSource,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Report an unrecoverable condition and abort the process.
///
/// The traced program shares our address space; unwinding through
/// instrumented frames is not an option.
pub fn fatal(msg: impl Display) -> ! {
    tracing::error!("FATAL: Taint: {msg}");
    eprintln!("FATAL: Taint: {msg}");
    std::process::abort()
}
