//! Kernel objects and the handle table that references them.

mod handles;
mod mutex;
mod namespace;
mod object_type;
mod semaphore;
pub(crate) mod storage;
mod thread;

use core::fmt::Debug;

use krnapi::{Error, Timeout, WaitStatus};

use crate::KrnResult;

pub use handles::{Handles, KernelHandle, HANDLES, MAX_HANDLES};
pub use mutex::Mutex;
pub use object_type::{ObjectHeader, TypeDescriptor, MUTEX_TYPE, SEMAPHORE_TYPE, THREAD_TYPE};
pub use semaphore::Semaphore;
pub use thread::{exit_current, Thread, ThreadTarget, PANIC_EXIT_CODE};

/// Trait to be implemented by all kernel objects
pub trait KObject: Debug + Send + Sync {
    /// Static description of the object kind
    fn descriptor(&self) -> &'static TypeDescriptor;

    /// Handle reference count
    fn header(&self) -> &ObjectHeader;

    /// Block until the object is signaled or the timeout elapses
    fn wait(&self, _timeout: Timeout) -> KrnResult<WaitStatus> {
        Err(Error::InvalidHandle)
    }

    /// Called once, when the last handle to the object is closed.
    ///
    /// Native resources are released when the last reference is dropped,
    /// which may be later if a wait is still in flight.
    fn close(&self);

    /// Called before a new handle is opened on an existing object
    fn duplicate(&self) -> KrnResult<()> {
        Ok(())
    }
}
