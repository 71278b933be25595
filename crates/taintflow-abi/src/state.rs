//! Process-global runtime and solver state.
//!
//! The runtime is written once during init and read lock-free afterwards.
//! The solver session sits behind one process-wide mutex: the solver is
//! single-threaded, and the lock also serializes filter state and the
//! constraint forest (every `__taint_trace_*` callback takes it).

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::OnceLock;

use taintflow_core::TaintRuntime;
use taintflow_solver::SolverSession;

static RUNTIME: OnceLock<TaintRuntime> = OnceLock::new();

static SESSION: Lazy<Mutex<Option<SolverSession>>> = Lazy::new(|| Mutex::new(None));

/// Install the runtime. Called exactly once by the lifecycle.
pub(crate) fn install_runtime(rt: TaintRuntime) {
    if RUNTIME.set(rt).is_err() {
        tracing::warn!("taint runtime initialized twice");
    }
}

pub(crate) fn install_session(session: SolverSession) {
    *SESSION.lock() = Some(session);
}

/// The runtime, if init has run. Callbacks arriving earlier see an
/// untainted world.
#[must_use]
pub fn try_runtime() -> Option<&'static TaintRuntime> {
    RUNTIME.get()
}

/// Run `f` under the solver lock. Returns `None` before init.
pub fn with_session<R>(f: impl FnOnce(&'static TaintRuntime, &mut SolverSession) -> R) -> Option<R> {
    let rt = try_runtime()?;
    let mut guard = SESSION.lock();
    let session = guard.as_mut()?;
    Some(f(rt, session))
}

/// Total inputs emitted so far; published to the fuzzer at exit.
#[must_use]
pub fn emitted_inputs() -> u32 {
    SESSION.lock().as_ref().map_or(0, SolverSession::emitted)
}
