//! Thin wrappers over the POSIX primitives the kernel objects are built on.
//!
//! Every call reports failures as [`krnapi::Error`], translated once from
//! `errno` (or from the returned error number for pthread calls).

mod cond;
mod error;
mod mutex;
pub mod pipe;
pub mod process;
pub mod shm;
pub mod thread;
pub mod time;

use core::ffi::c_int;

pub use cond::RawCondvar;
pub use error::*;
pub use krnapi::Error;
pub use mutex::{MutexKind, RawMutex};

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use mutex::TIMEDLOCK_POLL_INTERVAL;

pub type PosixResult<T> = Result<T, Error>;

/// libc convention: `-1` and `errno` on failure
fn ret_to_result(ret: c_int) -> PosixResult<c_int> {
    if ret == -1 {
        Err(last_os_error())
    } else {
        Ok(ret)
    }
}

/// pthread convention: the error number is returned
fn rc_to_result(rc: c_int) -> PosixResult<()> {
    match rc {
        0 => Ok(()),
        err => Err(translate_errno(err)),
    }
}
