#![feature(thread_local)]
#![feature(link_llvm_intrinsics)]
// Every export takes raw labels and pointers straight from instrumented
// code; validation happens at runtime, so per-function safety docs would be
// boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # taintflow-abi
//!
//! The extern "C" boundary the compiler instrumentation links against.
//! Produces the runtime shared object exposing the stable callback surface
//! (`__taint_union*`, `__taint_trace_*`, `dfsan_*`) plus the exported
//! thread-local scratch slots the instrumentation writes directly.
//!
//! # Architecture
//!
//! ```text
//! instrumented code -> ABI entry (this crate) -> taintflow-core engine
//!                                             -> taintflow-solver pipeline
//! ```
//!
//! The lifecycle module reserves the fixed-address regions before `main`
//! and drains runtime state at exit.

pub mod callbacks;
pub mod diag;
pub mod lifecycle;
pub mod regions;
pub mod state;
pub mod taint_file;
pub mod tls;
pub mod trace;
