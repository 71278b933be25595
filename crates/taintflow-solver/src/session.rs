//! Process-wide solver session.
//!
//! Owns the SMT context and solver, the serializer caches, the constraint
//! forest, the exploration filter, and the input synthesizer. Exactly one
//! session exists per traced process, behind the ABI layer's solver lock;
//! the lock is also what makes the session safe to hand between threads.

use z3::{Config, Context, Solver};

use taintflow_core::options::Options;

use crate::constraints::ConstraintForest;
use crate::filter::BranchCounters;
use crate::kv::{self, KvStore};
use crate::prefix::PathPrefixObserver;
use crate::serialize::Serializer;
use crate::synth::InputSynthesizer;

/// Per-check solver timeout.
pub const SOLVER_TIMEOUT_MS: u64 = 5000;

pub struct SolverSession {
    pub(crate) ctx: &'static Context,
    pub(crate) solver: Solver<'static>,
    pub(crate) serializer: Serializer,
    pub(crate) forest: ConstraintForest,
    pub(crate) counters: BranchCounters,
    pub(crate) kv: Box<dyn KvStore>,
    pub(crate) synth: InputSynthesizer,
    pub(crate) program: String,
    pub(crate) prefix: Option<PathPrefixObserver>,
}

// SAFETY: every Z3 object in the session is created and used only while the
// caller holds the process-wide solver lock; Z3 tolerates serialized use of
// one context from different threads.
unsafe impl Send for SolverSession {}

impl SolverSession {
    /// Build the session for an input of `input_size` bytes.
    #[must_use]
    pub fn new(input_size: usize, opts: &Options) -> Self {
        let ctx = leaked_context();
        Self {
            ctx,
            solver: Solver::new(ctx),
            serializer: Serializer::new(ctx),
            forest: ConstraintForest::new(input_size),
            counters: BranchCounters::new(),
            kv: kv::open_store(&opts.kv_store),
            synth: InputSynthesizer::new(opts.output_dir.clone()),
            program: opts.program_name(),
            prefix: opts.path_prefix.then(PathPrefixObserver::new),
        }
    }

    /// Session over an explicit store, for tests.
    #[must_use]
    pub fn with_store(input_size: usize, opts: &Options, store: Box<dyn KvStore>) -> Self {
        let mut session = Self::new(input_size, opts);
        session.kv = store;
        session
    }

    /// Inputs emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u32 {
        self.synth.emitted()
    }

    /// The rolling path-prefix hashes, when the observer is enabled.
    #[must_use]
    pub fn path_prefix_hashes(&self) -> Option<(u64, u64)> {
        self.prefix
            .as_ref()
            .map(|p| (p.taken_hash(), p.untaken_hash()))
    }
}

// The context must outlive every expression the session ever caches, and
// expressions are dropped in arbitrary order at process exit; leaking the
// context is the only sound lifetime.
fn leaked_context() -> &'static Context {
    let mut cfg = Config::new();
    cfg.set_timeout_msec(SOLVER_TIMEOUT_MS);
    Box::leak(Box::new(Context::new(&cfg)))
}
