//! Process lifecycle: init before `main`, drain at exit.
//!
//! Init runs from `.preinit_array`, before any instrumented code: it
//! reserves the fixed regions, maps the taint source, seeds the input-byte
//! labels, builds the solver session, and registers the exit hook. Fini
//! dumps labels when configured and publishes the emitted-input count to
//! the fuzzer harness through the shared-memory segment named by
//! `__AFL_SHM_ID`.

#[cfg(not(test))]
use std::ffi::{c_char, c_int};
use std::fs::File;

use taintflow_core::error::fatal;
use taintflow_core::options::options;
use taintflow_core::shadow::LABEL_REGION_SIZE;
use taintflow_core::store::LabelStore;
use taintflow_core::table::{UnionTable, table_region_bytes};
use taintflow_core::{TaintRuntime, TaintSource};
use taintflow_solver::SolverSession;

use crate::regions;
use crate::state;

/// One-time runtime construction.
pub fn initialize() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TAINT_LOG"))
        .with_writer(std::io::stderr)
        .try_init();

    let opts = options();
    tracing::debug!(
        instance = opts.instance_id,
        session = opts.session_id,
        "taint runtime starting"
    );

    let mapped = regions::reserve_or_die();
    // SAFETY: `reserve_or_die` just mapped both regions zero-filled, at
    // their fixed addresses, for the life of the process.
    let store = match unsafe { LabelStore::from_raw_region(mapped.label_base, LABEL_REGION_SIZE) } {
        Ok(store) => store,
        Err(err) => fatal(err),
    };
    // SAFETY: as above.
    let table = unsafe { UnionTable::from_raw_region(mapped.table_base, table_region_bytes()) };

    let source = match TaintSource::open(&opts.taint_file) {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(%err, file = %opts.taint_file, "failed to open taint file");
            TaintSource::none()
        }
    };
    let input_size = source.size();

    state::install_runtime(TaintRuntime::new(store, table, source));

    if opts.solver_select != 0 {
        tracing::warn!(
            solver_select = opts.solver_select,
            "alternative solver backends are not linked; using the built-in solver"
        );
    }
    state::install_session(SolverSession::new(input_size, opts));

    // SAFETY: `finalize` is an extern "C" fn with no preconditions.
    unsafe {
        libc::atexit(finalize);
    }
}

/// Exit hook: label dump and counter publication.
extern "C" fn finalize() {
    let opts = options();
    if !opts.dump_labels_at_exit.is_empty() {
        match (state::try_runtime(), File::create(&opts.dump_labels_at_exit)) {
            (Some(rt), Ok(mut file)) => {
                tracing::info!(path = %opts.dump_labels_at_exit, "dumping labels");
                if let Err(err) = rt.dump_labels(&mut file) {
                    tracing::warn!(%err, "label dump failed");
                }
            }
            (_, Err(err)) => {
                tracing::warn!(%err, path = %opts.dump_labels_at_exit, "unable to open dump file");
            }
            (None, _) => {}
        }
    }
    publish_emitted_count(state::emitted_inputs());
}

/// Hand the number of emitted inputs to the external harness.
fn publish_emitted_count(count: u32) {
    let Ok(shm_id) = std::env::var("__AFL_SHM_ID") else {
        return;
    };
    let Ok(shm_id) = shm_id.trim().parse::<i32>() else {
        tracing::warn!(%shm_id, "malformed __AFL_SHM_ID");
        return;
    };
    // SAFETY: attaching a harness-owned SysV segment read-write; detached
    // immediately after the single write.
    unsafe {
        let base = libc::shmat(shm_id, std::ptr::null(), 0);
        if base as isize == -1 {
            tracing::warn!(shm_id, "shmat failed");
            return;
        }
        *(base as *mut u32) = count;
        libc::shmdt(base);
    }
}

// Runs before `main` and before other initializers touch instrumented
// code. Shape matches the platform's preinit contract.
#[cfg(not(test))]
extern "C" fn preinit(_argc: c_int, _argv: *mut *mut c_char, _envp: *mut *mut c_char) {
    initialize();
}

#[cfg(not(test))]
#[used]
#[unsafe(link_section = ".preinit_array")]
static TAINTFLOW_INIT: extern "C" fn(c_int, *mut *mut c_char, *mut *mut c_char) = preinit;
