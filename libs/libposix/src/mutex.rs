use core::{cell::UnsafeCell, mem::MaybeUninit, ptr};

use krnapi::Error;
use log::warn;

use crate::{rc_to_result, time::Deadline, PosixResult};

/// Poll interval used where `pthread_mutex_timedlock` is missing
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub const TIMEDLOCK_POLL_INTERVAL: core::time::Duration = core::time::Duration::from_millis(25);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MutexKind {
    Normal,
    Recursive,
}

impl MutexKind {
    fn as_raw(self) -> libc::c_int {
        match self {
            MutexKind::Normal => libc::PTHREAD_MUTEX_NORMAL,
            MutexKind::Recursive => libc::PTHREAD_MUTEX_RECURSIVE,
        }
    }
}

/// A pthread mutex living at a fixed address, possibly inside a shared segment.
///
/// The value is never moved once initialized: it is created in place by
/// [`RawMutex::init`] and torn down by [`RawMutex::destroy`].
#[repr(C)]
pub struct RawMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    /// Initialize a mutex in place.
    ///
    /// # Safety
    ///
    /// `this` must point to writable memory large enough for a `RawMutex`,
    /// not in use by any thread, that stays at the same address until destroyed.
    pub unsafe fn init(this: *mut Self, kind: MutexKind, shared: bool) -> PosixResult<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        rc_to_result(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;

        let res = Self::init_with(this, attr.as_mut_ptr(), kind, shared);

        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        res
    }

    unsafe fn init_with(
        this: *mut Self,
        attr: *mut libc::pthread_mutexattr_t,
        kind: MutexKind,
        shared: bool,
    ) -> PosixResult<()> {
        rc_to_result(libc::pthread_mutexattr_settype(attr, kind.as_raw()))?;

        let pshared = if shared {
            libc::PTHREAD_PROCESS_SHARED
        } else {
            libc::PTHREAD_PROCESS_PRIVATE
        };
        rc_to_result(libc::pthread_mutexattr_setpshared(attr, pshared))?;

        let raw = UnsafeCell::raw_get(ptr::addr_of!((*this).inner));
        rc_to_result(libc::pthread_mutex_init(raw, attr))
    }

    /// Destroy the mutex.
    ///
    /// # Safety
    ///
    /// No thread may use the mutex afterwards, in any process.
    pub unsafe fn destroy(&self) {
        let rc = libc::pthread_mutex_destroy(self.as_ptr());
        if rc != 0 {
            warn!("pthread_mutex_destroy failed: {}", rc);
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }

    pub fn lock(&self) -> PosixResult<()> {
        rc_to_result(unsafe { libc::pthread_mutex_lock(self.as_ptr()) })
    }

    /// Returns `false` if the mutex is held by another thread
    pub fn try_lock(&self) -> PosixResult<bool> {
        match unsafe { libc::pthread_mutex_trylock(self.as_ptr()) } {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            rc => rc_to_result(rc).map(|_| false),
        }
    }

    /// Returns `false` if the deadline elapsed first.
    ///
    /// The deadline must be expressed on [`crate::time::MUTEX_CLOCK`].
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    pub fn timed_lock(&self, deadline: &Deadline) -> PosixResult<bool> {
        match unsafe { libc::pthread_mutex_timedlock(self.as_ptr(), deadline.as_timespec()) } {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            rc => rc_to_result(rc).map(|_| false),
        }
    }

    /// Returns `false` if the deadline elapsed first.
    ///
    /// The deadline must be expressed on [`crate::time::MUTEX_CLOCK`].
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub fn timed_lock(&self, deadline: &Deadline) -> PosixResult<bool> {
        loop {
            if self.try_lock()? {
                return Ok(true);
            }

            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Ok(false);
            }

            std::thread::sleep(remaining.min(TIMEDLOCK_POLL_INTERVAL));
        }
    }

    /// Fails with [`Error::NotOwner`] if the calling thread does not hold the mutex
    /// (error-checking and recursive kinds only).
    pub fn unlock(&self) -> PosixResult<()> {
        match unsafe { libc::pthread_mutex_unlock(self.as_ptr()) } {
            libc::EPERM => Err(Error::NotOwner),
            rc => rc_to_result(rc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MUTEX_CLOCK;

    fn new_mutex(kind: MutexKind) -> Box<RawMutex> {
        let mut storage = Box::new(MaybeUninit::<RawMutex>::uninit());
        unsafe {
            RawMutex::init(storage.as_mut_ptr(), kind, false).unwrap();
            Box::from_raw(Box::into_raw(storage) as *mut RawMutex)
        }
    }

    #[test]
    fn recursive_lock() {
        let mutex = new_mutex(MutexKind::Recursive);

        mutex.lock().unwrap();
        assert!(mutex.try_lock().unwrap());
        mutex.unlock().unwrap();
        mutex.unlock().unwrap();
        assert_eq!(mutex.unlock(), Err(Error::NotOwner));

        unsafe { mutex.destroy() };
    }

    #[test]
    fn timed_lock_expires() {
        let mutex = new_mutex(MutexKind::Normal);
        mutex.lock().unwrap();

        let busy = std::thread::scope(|scope| {
            scope
                .spawn(|| mutex.timed_lock(&Deadline::after(30, MUTEX_CLOCK)))
                .join()
                .unwrap()
        });
        assert_eq!(busy, Ok(false));

        mutex.unlock().unwrap();
        unsafe { mutex.destroy() };
    }
}
