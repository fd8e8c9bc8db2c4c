use std::sync::Arc;

use krnapi::{Access, Error, Handle, HandleFlags, ObjectType, Timeout, WaitStatus};
use lazy_static::lazy_static;
use log::{debug, trace};
use spin::RwLock;

use super::{KObject, Mutex, Semaphore, Thread, TypeDescriptor};
use crate::KrnResult;

/// Maximum number of handles open at once in the process
pub const MAX_HANDLES: usize = 1 << 20;

#[derive(Debug, Clone)]
pub enum KernelHandle {
    MutexHandle(Arc<Mutex>),
    SemaphoreHandle(Arc<Semaphore>),
    ThreadHandle(Arc<Thread>),
}

impl KernelHandle {
    pub fn r#type(&self) -> ObjectType {
        self.object().descriptor().id
    }

    pub fn descriptor(&self) -> &'static TypeDescriptor {
        self.object().descriptor()
    }

    pub fn object(&self) -> &dyn KObject {
        match self {
            KernelHandle::MutexHandle(mutex) => mutex.as_ref(),
            KernelHandle::SemaphoreHandle(semaphore) => semaphore.as_ref(),
            KernelHandle::ThreadHandle(thread) => thread.as_ref(),
        }
    }

    /// Check if the 2 handles points to the same object
    pub fn is_obj_eq(&self, other: &KernelHandle) -> bool {
        match (self, other) {
            (KernelHandle::MutexHandle(a), KernelHandle::MutexHandle(b)) => Arc::ptr_eq(a, b),
            (KernelHandle::SemaphoreHandle(a), KernelHandle::SemaphoreHandle(b)) => {
                Arc::ptr_eq(a, b)
            }
            (KernelHandle::ThreadHandle(a), KernelHandle::ThreadHandle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Entry {
    object: KernelHandle,
    access: Access,
    flags: HandleFlags,
}

#[derive(Debug)]
struct Slot {
    /// Bumped when the slot is freed, kept below `u32::MAX`
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
struct Slots {
    entries: Vec<Slot>,
    free: Vec<u32>,
}

impl Slots {
    fn get(&self, handle: Handle) -> KrnResult<&Entry> {
        let index = handle.index().ok_or(Error::InvalidHandle)?;

        match self.entries.get(index as usize) {
            Some(slot) if slot.generation == handle.generation() => {
                slot.entry.as_ref().ok_or(Error::InvalidHandle)
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    fn get_mut(&mut self, handle: Handle) -> KrnResult<&mut Slot> {
        let index = handle.index().ok_or(Error::InvalidHandle)?;

        match self.entries.get_mut(index as usize) {
            Some(slot) if slot.generation == handle.generation() && slot.entry.is_some() => {
                Ok(slot)
            }
            _ => Err(Error::InvalidHandle),
        }
    }
}

/// Handles management in the process
#[derive(Debug)]
pub struct Handles {
    slots: RwLock<Slots>,
}

lazy_static! {
    /// Process-wide handle table
    pub static ref HANDLES: Handles = Handles::new();
}

impl Handles {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Get the number of opened handles
    pub fn len(&self) -> usize {
        let slots = self.slots.read();

        slots.entries.len() - slots.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open the given mutex in the process
    pub fn open_mutex(&self, mutex: Arc<Mutex>, access: Access, flags: HandleFlags) -> KrnResult<Handle> {
        self.open(KernelHandle::MutexHandle(mutex), access, flags)
    }

    /// Open the given semaphore in the process
    pub fn open_semaphore(
        &self,
        semaphore: Arc<Semaphore>,
        access: Access,
        flags: HandleFlags,
    ) -> KrnResult<Handle> {
        self.open(KernelHandle::SemaphoreHandle(semaphore), access, flags)
    }

    /// Open the given thread in the process
    pub fn open_thread(&self, thread: Arc<Thread>, access: Access, flags: HandleFlags) -> KrnResult<Handle> {
        self.open(KernelHandle::ThreadHandle(thread), access, flags)
    }

    /// Open raw kernel handle.
    ///
    /// An empty `access` grants every right of the object kind.
    pub fn open(&self, object: KernelHandle, access: Access, flags: HandleFlags) -> KrnResult<Handle> {
        let access = if access.is_empty() {
            object.descriptor().all_access
        } else {
            access
        };

        object.object().header().acquire();
        self.insert(object, access, flags)
    }

    /// Store `object` in a free slot. The caller already counted the new handle.
    fn insert(&self, object: KernelHandle, access: Access, flags: HandleFlags) -> KrnResult<Handle> {
        let handle = {
            let mut slots = self.slots.write();

            let index = match slots.free.pop() {
                Some(index) => Some(index),
                None if slots.entries.len() < MAX_HANDLES => {
                    slots.entries.push(Slot {
                        generation: 0,
                        entry: None,
                    });
                    Some((slots.entries.len() - 1) as u32)
                }
                None => None,
            };

            index.map(|index| {
                let slot = &mut slots.entries[index as usize];
                slot.entry = Some(Entry {
                    object: object.clone(),
                    access,
                    flags,
                });
                Handle::from_parts(index, slot.generation)
            })
        };

        match handle {
            Some(handle) => {
                trace!("opened {:?} on {:?}", handle, object);
                Ok(handle)
            }
            None => {
                Self::release(object);
                Err(Error::SystemResource)
            }
        }
    }

    /// Close a handle; the object is closed with its last handle
    pub fn close(&self, handle: Handle) -> KrnResult<()> {
        let entry = {
            let mut slots = self.slots.write();
            let slot = slots.get_mut(handle)?;

            if slot
                .entry
                .as_ref()
                .is_some_and(|entry| entry.flags.contains(HandleFlags::PROTECT_FROM_CLOSE))
            {
                return Err(Error::InvalidHandle);
            }

            let entry = slot.entry.take().ok_or(Error::InvalidHandle)?;
            slot.generation = (slot.generation + 1) % u32::MAX;

            let index = handle.index().ok_or(Error::InvalidHandle)?;
            slots.free.push(index);
            entry
        };

        trace!("closed {:?}", handle);
        Self::release(entry.object);
        Ok(())
    }

    fn release(object: KernelHandle) {
        let kobject = object.object();

        if kobject.header().release() == 0 {
            debug!("last handle to {} closed", kobject.descriptor().name);
            kobject.close();
        }
    }

    /// Open a new handle to the same object, with the same access rights
    pub fn duplicate(&self, handle: Handle) -> KrnResult<Handle> {
        // Counted while the source handle still holds the object open
        let (object, access) = {
            let slots = self.slots.read();
            let entry = slots.get(handle)?;
            entry
                .object
                .object()
                .header()
                .try_acquire()
                .ok_or(Error::InvalidHandle)?;
            (entry.object.clone(), entry.access)
        };

        if let Err(err) = object.object().duplicate() {
            Self::release(object);
            return Err(err);
        }

        self.insert(object, access, HandleFlags::empty())
    }

    /// Wait for the object to be signaled.
    ///
    /// The table is not locked while blocking.
    pub fn wait(&self, handle: Handle, timeout: Timeout) -> KrnResult<WaitStatus> {
        let object = self.get(handle, Access::SYNCHRONIZE)?;

        if !object.descriptor().waitable {
            return Err(Error::InvalidHandle);
        }

        object.object().wait(timeout)
    }

    /// Retrieve the type of the handle
    pub fn r#type(&self, handle: Handle) -> KrnResult<ObjectType> {
        let slots = self.slots.read();

        Ok(slots.get(handle)?.object.r#type())
    }

    /// Number of handles open on the object referenced by `handle`
    pub fn ref_count(&self, handle: Handle) -> KrnResult<usize> {
        let slots = self.slots.read();

        Ok(slots.get(handle)?.object.object().header().count())
    }

    pub fn is_obj_eq(&self, handle1: Handle, handle2: Handle) -> KrnResult<bool> {
        let slots = self.slots.read();

        let handle1_impl = slots.get(handle1)?;
        let handle2_impl = slots.get(handle2)?;

        Ok(handle1_impl.object.is_obj_eq(&handle2_impl.object))
    }

    pub fn flags(&self, handle: Handle) -> KrnResult<HandleFlags> {
        let slots = self.slots.read();

        Ok(slots.get(handle)?.flags)
    }

    /// Update the flags selected by `mask`
    pub fn set_flags(&self, handle: Handle, mask: HandleFlags, flags: HandleFlags) -> KrnResult<()> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(handle)?;

        if let Some(entry) = slot.entry.as_mut() {
            entry.flags = (entry.flags & !mask) | (flags & mask);
        }

        Ok(())
    }

    pub fn access(&self, handle: Handle) -> KrnResult<Access> {
        let slots = self.slots.read();

        Ok(slots.get(handle)?.access)
    }

    /// Retrieve the object, checking the handle grants `required`
    pub fn get(&self, handle: Handle, required: Access) -> KrnResult<KernelHandle> {
        let slots = self.slots.read();
        let entry = slots.get(handle)?;

        if !entry.access.contains(required) {
            return Err(Error::AccessDenied);
        }

        Ok(entry.object.clone())
    }

    /// Retrieve the mutex from the handle
    pub fn get_mutex(&self, handle: Handle, required: Access) -> KrnResult<Arc<Mutex>> {
        match self.get(handle, required)? {
            KernelHandle::MutexHandle(mutex) => Ok(mutex),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Retrieve the semaphore from the handle
    pub fn get_semaphore(&self, handle: Handle, required: Access) -> KrnResult<Arc<Semaphore>> {
        match self.get(handle, required)? {
            KernelHandle::SemaphoreHandle(semaphore) => Ok(semaphore),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Retrieve the thread from the handle
    pub fn get_thread(&self, handle: Handle, required: Access) -> KrnResult<Arc<Thread>> {
        match self.get(handle, required)? {
            KernelHandle::ThreadHandle(thread) => Ok(thread),
            _ => Err(Error::InvalidHandle),
        }
    }
}

impl Default for Handles {
    fn default() -> Self {
        Self::new()
    }
}
