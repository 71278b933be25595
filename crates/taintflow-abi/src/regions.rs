//! Fixed-address region reservation.
//!
//! The shadow mapping is pure address arithmetic, so the shadow range, the
//! label-record region, and the hash-cons table must sit at their fixed
//! addresses before the first instrumented instruction runs. Everything is
//! mapped `NORESERVE`; pages materialize as they are touched.

use std::ffi::c_void;
use std::io;

use taintflow_core::error::fatal;
use taintflow_core::shadow::{
    APP_ADDR, HASH_TABLE_ADDR, HASH_TABLE_SIZE, LABEL_REGION_ADDR, LABEL_REGION_SIZE, SHADOW_ADDR,
};

/// Base pointers of the reserved regions.
pub struct Regions {
    pub label_base: *mut u8,
    pub table_base: *mut u8,
}

/// Reserve every fixed region, aborting on failure; a partially-mapped
/// layout cannot be recovered.
pub fn reserve_or_die() -> Regions {
    check_vma();
    // Shadow cells cover [SHADOW_ADDR, LABEL_REGION_ADDR).
    if let Err(err) = mmap_fixed(SHADOW_ADDR, LABEL_REGION_ADDR - SHADOW_ADDR, libc::PROT_READ | libc::PROT_WRITE) {
        fatal(format_args!("failed to map shadow region: {err}"));
    }
    let label_base = match mmap_fixed(LABEL_REGION_ADDR, LABEL_REGION_SIZE, libc::PROT_READ | libc::PROT_WRITE) {
        Ok(p) => p,
        Err(err) => fatal(format_args!("failed to map label region: {err}")),
    };
    let table_base = match mmap_fixed(HASH_TABLE_ADDR, HASH_TABLE_SIZE, libc::PROT_READ | libc::PROT_WRITE) {
        Ok(p) => p,
        Err(err) => fatal(format_args!("failed to map hash table region: {err}")),
    };
    // Keep the gap up to application memory unusable so the app/shadow
    // correspondence stays one-to-one.
    let gap_base = HASH_TABLE_ADDR + HASH_TABLE_SIZE;
    if let Err(err) = mmap_fixed(gap_base, APP_ADDR - gap_base, libc::PROT_NONE) {
        fatal(format_args!("failed to protect unused region: {err}"));
    }
    Regions {
        label_base,
        table_base,
    }
}

fn mmap_fixed(addr: usize, len: usize, prot: i32) -> io::Result<*mut u8> {
    // SAFETY: the requested ranges lie outside anything the loader maps at
    // these fixed addresses; MAP_FIXED is the point of the layout.
    let p = unsafe {
        libc::mmap(
            addr as *mut c_void,
            len,
            prot,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED | libc::MAP_NORESERVE,
            -1,
            0,
        )
    };
    if p == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(p.cast::<u8>())
}

/// Userspace virtual-address width of this process.
#[must_use]
pub fn vma_size() -> u32 {
    let probe = 0u8;
    let addr = std::ptr::addr_of!(probe) as usize;
    (usize::BITS - addr.leading_zeros()).max(1)
}

/// The fixed layout assumes the classic 48-bit x86-64 arrangement.
fn check_vma() {
    let vma = vma_size();
    if vma != 48 {
        fatal(format_args!(
            "unsupported VMA range: found {vma}, supported 48"
        ));
    }
}
