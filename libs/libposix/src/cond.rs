use core::{cell::UnsafeCell, mem::MaybeUninit, ptr};

use log::warn;

use crate::{rc_to_result, time::Deadline, PosixResult, RawMutex};

/// A pthread condition variable living at a fixed address.
///
/// Timed waits take deadlines on [`crate::time::CONDVAR_CLOCK`].
#[repr(C)]
pub struct RawCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for RawCondvar {}
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    /// Initialize a condition variable in place.
    ///
    /// # Safety
    ///
    /// Same contract as [`RawMutex::init`].
    pub unsafe fn init(this: *mut Self, shared: bool) -> PosixResult<()> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        rc_to_result(libc::pthread_condattr_init(attr.as_mut_ptr()))?;

        let res = Self::init_with(this, attr.as_mut_ptr(), shared);

        libc::pthread_condattr_destroy(attr.as_mut_ptr());
        res
    }

    unsafe fn init_with(
        this: *mut Self,
        attr: *mut libc::pthread_condattr_t,
        shared: bool,
    ) -> PosixResult<()> {
        let pshared = if shared {
            libc::PTHREAD_PROCESS_SHARED
        } else {
            libc::PTHREAD_PROCESS_PRIVATE
        };
        rc_to_result(libc::pthread_condattr_setpshared(attr, pshared))?;

        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        rc_to_result(libc::pthread_condattr_setclock(
            attr,
            crate::time::CONDVAR_CLOCK,
        ))?;

        let raw = UnsafeCell::raw_get(ptr::addr_of!((*this).inner));
        rc_to_result(libc::pthread_cond_init(raw, attr))
    }

    /// Destroy the condition variable.
    ///
    /// # Safety
    ///
    /// No thread may wait on it afterwards, in any process.
    pub unsafe fn destroy(&self) {
        let rc = libc::pthread_cond_destroy(self.inner.get());
        if rc != 0 {
            warn!("pthread_cond_destroy failed: {}", rc);
        }
    }

    /// `mutex` must be held by the caller
    pub fn wait(&self, mutex: &RawMutex) -> PosixResult<()> {
        rc_to_result(unsafe { libc::pthread_cond_wait(self.inner.get(), mutex.as_ptr()) })
    }

    /// Returns `false` on timeout. `mutex` must be held by the caller.
    pub fn timed_wait(&self, mutex: &RawMutex, deadline: &Deadline) -> PosixResult<bool> {
        match unsafe {
            libc::pthread_cond_timedwait(self.inner.get(), mutex.as_ptr(), deadline.as_timespec())
        } {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            rc => rc_to_result(rc).map(|_| false),
        }
    }

    pub fn signal(&self) -> PosixResult<()> {
        rc_to_result(unsafe { libc::pthread_cond_signal(self.inner.get()) })
    }

    pub fn broadcast(&self) -> PosixResult<()> {
        rc_to_result(unsafe { libc::pthread_cond_broadcast(self.inner.get()) })
    }
}
