use std::sync::Arc;

use krnapi::{Timeout, WaitStatus};
use libposix::{
    shm::Creation,
    time::{Deadline, MUTEX_CLOCK},
    MutexKind, RawMutex,
};
use log::{debug, trace};

use super::{
    namespace,
    storage::{NativeObject, Storage},
    KObject, ObjectHeader, TypeDescriptor, MUTEX_TYPE,
};
use crate::KrnResult;

/// Parameters of a native mutex
pub struct MutexParams {
    /// Lock the mutex for the calling thread right after initialization
    pub initial_owner: bool,
}

impl NativeObject for RawMutex {
    type Params = MutexParams;

    unsafe fn init(this: *mut Self, shared: bool, params: &MutexParams) -> KrnResult<()> {
        RawMutex::init(this, MutexKind::Recursive, shared)?;

        if params.initial_owner {
            if let Err(err) = (*this).lock() {
                (*this).destroy();
                return Err(err);
            }
        }

        Ok(())
    }

    unsafe fn destroy(&self) {
        RawMutex::destroy(self)
    }
}

/// Recursive mutex, private to the process or shared by name
#[derive(Debug)]
pub struct Mutex {
    header: ObjectHeader,
    storage: Storage<RawMutex>,
}

impl Mutex {
    /// Create a mutex; a named one is opened instead if it already exists.
    ///
    /// Ownership is only taken when the mutex is actually created.
    pub fn create(name: Option<&str>, initial_owner: bool) -> KrnResult<(Arc<Self>, Creation)> {
        let params = MutexParams { initial_owner };

        let (storage, creation) = match name {
            None => (Storage::private(&params)?, Creation::Created),
            Some(name) => {
                let (segment, creation) = namespace::create::<RawMutex>(name, &params)?;
                (Storage::Named(segment), creation)
            }
        };

        debug!("mutex {:?} {:?}", storage, creation);
        Ok((Self::new(storage), creation))
    }

    pub fn open(name: &str) -> KrnResult<Arc<Self>> {
        let segment = namespace::open::<RawMutex>(name)?;
        let storage = Storage::Named(segment);

        debug!("mutex {:?} opened", storage);
        Ok(Self::new(storage))
    }

    fn new(storage: Storage<RawMutex>) -> Arc<Self> {
        Arc::new(Self {
            header: ObjectHeader::new(),
            storage,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.storage.name()
    }

    /// Release one level of ownership
    pub fn release(&self) -> KrnResult<()> {
        self.storage.unlock()
    }
}

impl KObject for Mutex {
    fn descriptor(&self) -> &'static TypeDescriptor {
        &MUTEX_TYPE
    }

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn wait(&self, timeout: Timeout) -> KrnResult<WaitStatus> {
        trace!("mutex {:?} wait {:?}", self.storage, timeout);

        let acquired = match timeout {
            Timeout::Infinite => self.storage.lock().map(|_| true)?,
            Timeout::Millis(0) => self.storage.try_lock()?,
            Timeout::Millis(ms) => self
                .storage
                .timed_lock(&Deadline::after(ms, MUTEX_CLOCK))?,
        };

        Ok(if acquired {
            WaitStatus::Signaled
        } else {
            WaitStatus::TimedOut
        })
    }

    fn close(&self) {
        debug!("mutex {:?} closed", self.storage);

        if let Some(name) = self.storage.name() {
            namespace::release(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krnapi::Error;

    #[test]
    fn private_recursive() {
        let (mutex, creation) = Mutex::create(None, true).unwrap();
        assert_eq!(creation, Creation::Created);

        assert_eq!(mutex.wait(Timeout::Millis(0)), Ok(WaitStatus::Signaled));
        mutex.release().unwrap();
        mutex.release().unwrap();
        assert_eq!(mutex.release(), Err(Error::NotOwner));

        mutex.close();
    }

    #[test]
    fn contended_times_out() {
        let (mutex, _) = Mutex::create(None, false).unwrap();
        assert_eq!(mutex.wait(Timeout::Infinite), Ok(WaitStatus::Signaled));

        let other = mutex.clone();
        let status = std::thread::spawn(move || other.wait(Timeout::Millis(20)))
            .join()
            .unwrap();
        assert_eq!(status, Ok(WaitStatus::TimedOut));

        mutex.release().unwrap();
        mutex.close();
    }
}
