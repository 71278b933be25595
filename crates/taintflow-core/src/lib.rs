//! # taintflow-core
//!
//! Symbolic label engine for the taintflow runtime: the label store and its
//! hash-consing allocator, the shadow-memory address scheme, and the
//! propagation protocol (`union` / `union_load` / `union_store`) invoked by
//! compiler instrumentation.
//!
//! This crate holds no process-global state. All operations go through a
//! [`TaintRuntime`], which the ABI layer instantiates once over the reserved
//! fixed-address regions and which tests instantiate over heap storage.

pub mod error;
pub mod input;
pub mod label;
pub mod op;
pub mod options;
mod propagate;
pub mod runtime;
pub mod shadow;
pub mod store;
pub mod table;

pub use error::CoreError;
pub use input::TaintSource;
pub use label::{B_FLIPPED, CONST_LABEL, CONST_OFFSET, INITIALIZING_LABEL, Label, LabelInfo};
pub use runtime::TaintRuntime;
