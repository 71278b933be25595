//! Diagnostic exports.

use std::ffi::{CStr, c_char};

use taintflow_core::error::fatal;
use taintflow_core::options::options;

fn name_of(fname: *const c_char) -> String {
    if fname.is_null() {
        return "<null>".to_string();
    }
    // SAFETY: instrumentation passes a NUL-terminated literal.
    unsafe { CStr::from_ptr(fname) }
        .to_string_lossy()
        .into_owned()
}

/// Call into a function the instrumentation has no model for.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dfsan_unimplemented(fname: *const c_char) {
    if options().warn_unimplemented {
        tracing::warn!(
            function = %name_of(fname),
            "call to uninstrumented function"
        );
    }
}

/// Break on this (or enable the warning) to find where labels leak into a
/// nominally label-free program.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dfsan_nonzero_label() {
    if options().warn_nonzero_labels {
        tracing::warn!("saw nonzero label");
    }
}

/// Indirect call to an uninstrumented vararg function; there is no way to
/// marshal its argument labels.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __dfsan_vararg_wrapper(fname: *const c_char) {
    fatal(format_args!(
        "unsupported indirect call to vararg function {}",
        name_of(fname)
    ));
}
