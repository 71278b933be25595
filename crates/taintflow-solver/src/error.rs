//! Errors of the solving pipeline.
//!
//! Everything here is recoverable: the driver logs a warning, skips the
//! branch, and keeps tracing. Fatal conditions never originate in this
//! crate.

use taintflow_core::Label;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("invalid label: {0}")]
    InvalidLabel(Label),
    #[error("label {label}: {what}")]
    MalformedNode { label: Label, what: &'static str },
    #[error("unsupported operator: {0}")]
    UnsupportedOp(u16),
    #[error("unsupported predicate: {0}")]
    UnsupportedPredicate(u16),
    #[error("invalid concrete address")]
    BadConcreteRead,
    #[error("expression sort mismatch")]
    SortMismatch,
    #[error("solver reported sat but produced no model")]
    NoModel,
    #[error("taint source is stdin; cannot synthesize a new input")]
    StdinSource,
    #[error("no taint source to synthesize from")]
    NoSource,
    #[error("kv store: {0}")]
    Store(#[from] sled::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
