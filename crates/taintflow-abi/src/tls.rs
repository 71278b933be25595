//! Exported thread-local scratch slots.
//!
//! These are part of the stable instrumentation ABI: function prologues
//! and call sites in instrumented code read and write them directly by
//! symbol name. The runtime itself only ever reads the call-stack id.

use taintflow_core::shadow::SHADOW_MASK;

/// Call-stack id maintained by instrumented function entry/exit.
#[unsafe(no_mangle)]
#[thread_local]
pub static mut __taint_trace_callstack: u32 = 0;

/// Label of the current function's return value.
#[unsafe(no_mangle)]
#[thread_local]
pub static mut __dfsan_retval_tls: u32 = 0;

/// Labels of the current call's arguments.
#[unsafe(no_mangle)]
#[thread_local]
pub static mut __dfsan_arg_tls: [u32; 64] = [0; 64];

/// Mask applied by inlined shadow-address computations.
#[unsafe(no_mangle)]
pub static __dfsan_shadow_ptr_mask: usize = SHADOW_MASK;

/// The current thread's call-stack id.
#[must_use]
pub fn callstack_id() -> u32 {
    // SAFETY: plain copy of a thread-local word; instrumented code on this
    // thread is the only writer.
    unsafe { __taint_trace_callstack }
}
