use core::{cell::UnsafeCell, ptr};
use std::sync::Arc;

use krnapi::{Error, Timeout, WaitStatus};
use libposix::{
    shm::Creation,
    time::{Deadline, CONDVAR_CLOCK},
    MutexKind, RawCondvar, RawMutex,
};
use log::{debug, trace};

use super::{
    namespace,
    storage::{NativeObject, Storage},
    KObject, ObjectHeader, TypeDescriptor, SEMAPHORE_TYPE,
};
use crate::KrnResult;

pub struct SemaphoreParams {
    pub initial: i32,
    pub max: i32,
}

/// Counting semaphore state, laid out in place (possibly in a shared segment)
#[repr(C)]
pub struct SemaphoreCell {
    lock: RawMutex,
    cond: RawCondvar,
    value: UnsafeCell<i32>,
    max: i32,
}

// `value` is only accessed with `lock` held
unsafe impl Send for SemaphoreCell {}
unsafe impl Sync for SemaphoreCell {}

impl NativeObject for SemaphoreCell {
    type Params = SemaphoreParams;

    unsafe fn init(this: *mut Self, shared: bool, params: &SemaphoreParams) -> KrnResult<()> {
        RawMutex::init(ptr::addr_of_mut!((*this).lock), MutexKind::Normal, shared)?;

        if let Err(err) = RawCondvar::init(ptr::addr_of_mut!((*this).cond), shared) {
            (*this).lock.destroy();
            return Err(err);
        }

        ptr::addr_of_mut!((*this).value).write(UnsafeCell::new(params.initial));
        ptr::addr_of_mut!((*this).max).write(params.max);
        Ok(())
    }

    unsafe fn destroy(&self) {
        self.cond.destroy();
        self.lock.destroy();
    }
}

impl SemaphoreCell {
    fn with_lock<R>(&self, f: impl FnOnce(&mut i32) -> KrnResult<R>) -> KrnResult<R> {
        self.lock.lock()?;
        let res = f(unsafe { &mut *self.value.get() });
        self.lock.unlock()?;
        res
    }

    fn wait(&self, timeout: Timeout) -> KrnResult<WaitStatus> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(Deadline::after(ms, CONDVAR_CLOCK)),
        };

        self.lock.lock()?;
        let res = self.wait_locked(deadline.as_ref());
        self.lock.unlock()?;
        res
    }

    fn wait_locked(&self, deadline: Option<&Deadline>) -> KrnResult<WaitStatus> {
        loop {
            let value = unsafe { &mut *self.value.get() };
            if *value > 0 {
                *value -= 1;

                // Release only signals on the transition from zero: pass the wake-up on
                if *value > 0 {
                    self.cond.signal()?;
                }

                return Ok(WaitStatus::Signaled);
            }

            match deadline {
                None => self.cond.wait(&self.lock)?,
                Some(deadline) => {
                    let woken = self.cond.timed_wait(&self.lock, deadline)?;
                    if !woken && unsafe { *self.value.get() } == 0 {
                        return Ok(WaitStatus::TimedOut);
                    }
                }
            }
        }
    }

    /// Add `count` units, returning the previous count
    fn release(&self, count: i32) -> KrnResult<i32> {
        let max = self.max;

        self.with_lock(|value| {
            let previous = *value;

            match previous.checked_add(count) {
                Some(next) if count > 0 && next <= max => {
                    if previous == 0 {
                        self.cond.signal()?;
                    }
                    *value = next;
                    Ok(previous)
                }
                _ => Err(Error::BadArguments),
            }
        })
    }

    fn count(&self) -> KrnResult<i32> {
        self.with_lock(|value| Ok(*value))
    }
}

/// Counting semaphore bounded by a maximum
#[derive(Debug)]
pub struct Semaphore {
    header: ObjectHeader,
    storage: Storage<SemaphoreCell>,
}

impl Semaphore {
    /// Create a semaphore; a named one is opened instead if it already exists,
    /// keeping its current count and maximum.
    pub fn create(name: Option<&str>, initial: i32, max: i32) -> KrnResult<(Arc<Self>, Creation)> {
        if initial < 0 || max <= 0 || initial > max {
            return Err(Error::BadArguments);
        }

        let params = SemaphoreParams { initial, max };

        let (storage, creation) = match name {
            None => (Storage::private(&params)?, Creation::Created),
            Some(name) => {
                let (segment, creation) = namespace::create::<SemaphoreCell>(name, &params)?;
                (Storage::Named(segment), creation)
            }
        };

        debug!("semaphore {:?} {:?} ({}/{})", storage, creation, initial, max);
        Ok((Self::new(storage), creation))
    }

    pub fn open(name: &str) -> KrnResult<Arc<Self>> {
        let segment = namespace::open::<SemaphoreCell>(name)?;
        let storage = Storage::Named(segment);

        debug!("semaphore {:?} opened", storage);
        Ok(Self::new(storage))
    }

    fn new(storage: Storage<SemaphoreCell>) -> Arc<Self> {
        Arc::new(Self {
            header: ObjectHeader::new(),
            storage,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.storage.name()
    }

    pub fn max(&self) -> i32 {
        self.storage.max
    }

    /// Current count
    pub fn count(&self) -> KrnResult<i32> {
        self.storage.count()
    }

    /// Add `count` units and wake waiters. Returns the previous count.
    ///
    /// Fails with [`Error::BadArguments`], leaving the count unchanged, if
    /// `count` is not positive or the maximum would be exceeded.
    pub fn release(&self, count: i32) -> KrnResult<i32> {
        self.storage.release(count)
    }
}

impl KObject for Semaphore {
    fn descriptor(&self) -> &'static TypeDescriptor {
        &SEMAPHORE_TYPE
    }

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn wait(&self, timeout: Timeout) -> KrnResult<WaitStatus> {
        trace!("semaphore {:?} wait {:?}", self.storage, timeout);
        self.storage.wait(timeout)
    }

    fn close(&self) {
        debug!("semaphore {:?} closed", self.storage);

        if let Some(name) = self.storage.name() {
            namespace::release(name);
        }
    }
}
