//! # taintflow-solver
//!
//! The branch solving pipeline: serializes label sub-DAGs into bit-vector
//! formulas, accumulates per-input-byte path constraints, drives the SMT
//! solver over negated branch conditions, and synthesizes new input files
//! from satisfying models.
//!
//! All solver state lives in a [`SolverSession`]; the ABI layer owns one
//! behind a process-wide lock, which also serializes the single-threaded
//! solver itself.

pub mod constraints;
mod driver;
pub mod error;
pub mod filter;
pub mod kv;
pub mod prefix;
pub mod serialize;
pub mod session;
pub mod sym;
pub mod synth;

pub use driver::BranchSite;
pub use error::SolveError;
pub use session::SolverSession;
