//! Branch and index trace exports.
//!
//! Each callback captures its own return address (the instrumented call
//! site), pairs it with the thread's call-stack id, and hands the trigger
//! to the solver session under the process-wide solver lock.

use taintflow_core::label::Label;

use crate::state::with_session;
use crate::tls::callstack_id;
use taintflow_solver::BranchSite;

unsafe extern "C" {
    #[link_name = "llvm.returnaddress"]
    fn llvm_returnaddress(level: i32) -> *const u8;
}

/// Address of the instrumented call site invoking the current export.
///
/// Must stay inlined into the `extern "C"` entry so level 0 names its
/// caller.
#[inline(always)]
fn call_site() -> usize {
    // SAFETY: level 0 is always valid.
    unsafe { llvm_returnaddress(0) as usize }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_trace_cmp(
    l1: Label,
    l2: Label,
    size: u32,
    predicate: u32,
    c1: u64,
    c2: u64,
) {
    let site = BranchSite {
        addr: call_site(),
        callstack: callstack_id(),
    };
    with_session(|rt, session| session.trace_cmp(rt, l1, l2, size, predicate, c1, c2, site));
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_trace_cond(label: Label, taken: u8) {
    let site = BranchSite {
        addr: call_site(),
        callstack: callstack_id(),
    };
    with_session(|rt, session| session.trace_cond(rt, label, taken != 0, site));
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_trace_gep(label: Label, index: u64) {
    let site = BranchSite {
        addr: call_site(),
        callstack: callstack_id(),
    };
    with_session(|rt, session| session.trace_gep(rt, label, index, site));
}

/// Tainted indirect call target; observed only.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_trace_indcall(label: Label) {
    with_session(|_, session| session.trace_indcall(label));
}

/// Debug shim kept for ABI completeness.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __taint_debug(
    _op1: Label,
    _op2: Label,
    _predicate: i32,
    _size: u32,
    _target: u32,
) {
}

/// Branch-unfolding hook emitted by some instrumentation versions.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __unfold_branch_fn(_r: u32) {}
