use core::sync::atomic::{AtomicUsize, Ordering};

use krnapi::{Access, ObjectType};

/// Static, per-kind description of kernel objects
#[derive(Debug)]
pub struct TypeDescriptor {
    pub id: ObjectType,
    pub name: &'static str,
    pub waitable: bool,
    /// Rights granted when a handle is opened with an empty access mask
    pub all_access: Access,
}

pub static MUTEX_TYPE: TypeDescriptor = TypeDescriptor {
    id: ObjectType::Mutex,
    name: ObjectType::Mutex.name(),
    waitable: true,
    all_access: Access::MUTEX_ALL_ACCESS,
};

pub static SEMAPHORE_TYPE: TypeDescriptor = TypeDescriptor {
    id: ObjectType::Semaphore,
    name: ObjectType::Semaphore.name(),
    waitable: true,
    all_access: Access::SEMAPHORE_ALL_ACCESS,
};

pub static THREAD_TYPE: TypeDescriptor = TypeDescriptor {
    id: ObjectType::Thread,
    name: ObjectType::Thread.name(),
    waitable: true,
    all_access: Access::THREAD_ALL_ACCESS,
};

/// Common header of kernel objects: number of open handles
#[derive(Debug, Default)]
pub struct ObjectHeader {
    handles: AtomicUsize,
}

impl ObjectHeader {
    pub const fn new() -> Self {
        Self {
            handles: AtomicUsize::new(0),
        }
    }

    /// Returns the new count
    pub fn acquire(&self) -> usize {
        self.handles.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Take one more reference on an object that still has handles.
    ///
    /// Fails once the count dropped to zero: the object is closed for good.
    pub fn try_acquire(&self) -> Option<usize> {
        self.handles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then_some(count + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Returns the new count
    pub fn release(&self) -> usize {
        let previous = self.handles.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "handle count underflow");
        previous - 1
    }

    pub fn count(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_counts() {
        let header = ObjectHeader::new();

        assert_eq!(header.acquire(), 1);
        assert_eq!(header.acquire(), 2);
        assert_eq!(header.release(), 1);
        assert_eq!(header.count(), 1);
        assert_eq!(header.release(), 0);
    }

    #[test]
    fn closed_header_stays_closed() {
        let header = ObjectHeader::new();
        assert_eq!(header.try_acquire(), None);

        header.acquire();
        assert_eq!(header.try_acquire(), Some(2));
        header.release();
        header.release();

        assert_eq!(header.try_acquire(), None);
        assert_eq!(header.count(), 0);
    }

    #[test]
    fn descriptors() {
        assert_eq!(MUTEX_TYPE.id.into_raw(), 8);
        assert_eq!(SEMAPHORE_TYPE.id.into_raw(), 6);
        assert_eq!(THREAD_TYPE.id.into_raw(), 4);
        assert!(MUTEX_TYPE.all_access.contains(Access::SYNCHRONIZE));
    }
}
