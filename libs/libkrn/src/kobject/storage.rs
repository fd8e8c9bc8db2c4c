use core::{
    any::Any,
    fmt,
    marker::PhantomData,
    mem::{self, MaybeUninit},
    ops::Deref,
    sync::atomic::{AtomicBool, Ordering},
};

use std::sync::Arc;

use libposix::shm::{Creation, SharedMemory};
use log::{debug, warn};

use crate::KrnResult;

/// Native state initialized in place at a fixed address
pub trait NativeObject: Send + Sync + 'static {
    type Params;

    /// Initialize the object in place.
    ///
    /// # Safety
    ///
    /// `this` points to writable, suitably aligned memory that nothing else
    /// uses yet and that does not move until [`NativeObject::destroy`].
    unsafe fn init(this: *mut Self, shared: bool, params: &Self::Params) -> KrnResult<()>;

    /// Release the native resources.
    ///
    /// # Safety
    ///
    /// Called once, when no thread in any process uses the object anymore.
    unsafe fn destroy(&self);
}

/// Process-private native object on the heap
pub struct Private<T: NativeObject> {
    object: Box<T>,
}

impl<T: NativeObject> Private<T> {
    pub fn new(params: &T::Params) -> KrnResult<Self> {
        let mut storage = Box::new(MaybeUninit::<T>::uninit());
        unsafe { T::init(storage.as_mut_ptr(), false, params)? };

        // Initialized above
        let object = unsafe { Box::from_raw(Box::into_raw(storage).cast::<T>()) };
        Ok(Self { object })
    }
}

impl<T: NativeObject> Deref for Private<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T: NativeObject> Drop for Private<T> {
    fn drop(&mut self) {
        unsafe { self.object.destroy() };
    }
}

/// Native object living in a named shared memory segment
pub struct Segment<T: NativeObject> {
    name: String,
    shm: SharedMemory,
    destroy_on_drop: AtomicBool,
    _marker: PhantomData<T>,
}

impl<T: NativeObject> Segment<T> {
    /// Create the segment, initializing the object if this call created it
    pub fn create(name: &str, params: &T::Params) -> KrnResult<(Self, Creation)> {
        let (shm, creation) = SharedMemory::create(name, mem::size_of::<T>())?;

        if creation == Creation::Created {
            if let Err(err) = unsafe { T::init(shm.as_ptr().cast::<T>(), true, params) } {
                warn!("could not initialize {:?}: {}", shm.path(), err);
                shm.abandon();
                return Err(err);
            }

            if let Err(err) = shm.publish() {
                unsafe { (*shm.as_ptr().cast::<T>()).destroy() };
                shm.abandon();
                return Err(err);
            }
        }

        Ok((Self::wrap(name, shm), creation))
    }

    /// Attach to a segment created by someone else
    pub fn open(name: &str) -> KrnResult<Self> {
        let shm = SharedMemory::open(name, mem::size_of::<T>())?;
        Ok(Self::wrap(name, shm))
    }

    fn wrap(name: &str, shm: SharedMemory) -> Self {
        Self {
            name: name.into(),
            shm,
            destroy_on_drop: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: NativeObject> Deref for Segment<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.shm.as_ptr().cast::<T>() }
    }
}

impl<T: NativeObject> Drop for Segment<T> {
    fn drop(&mut self) {
        if self.destroy_on_drop.load(Ordering::Acquire) {
            debug!("destroying segment {}", self.name);
            unsafe { self.deref().destroy() };
        }
    }
}

/// Type-erased view of a segment, kept by the namespace
pub trait SegmentLink: Send + Sync {
    /// Stop holding the segment alive for this process.
    /// The last process to detach unlinks the name and destroys the object.
    fn detach(&self);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: NativeObject> SegmentLink for Segment<T> {
    fn detach(&self) {
        if self.shm.detach() {
            self.destroy_on_drop.store(true, Ordering::Release);
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Where the native state of a mutex or a semaphore lives
pub enum Storage<T: NativeObject> {
    Private(Private<T>),
    Named(Arc<Segment<T>>),
}

impl<T: NativeObject> Storage<T> {
    pub fn private(params: &T::Params) -> KrnResult<Self> {
        Ok(Storage::Private(Private::new(params)?))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Storage::Private(_) => None,
            Storage::Named(segment) => Some(segment.name()),
        }
    }
}

impl<T: NativeObject> Deref for Storage<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Storage::Private(private) => private,
            Storage::Named(segment) => segment,
        }
    }
}

impl<T: NativeObject> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Private(_) => write!(f, "Private"),
            Storage::Named(segment) => write!(f, "Named({:?})", segment.name()),
        }
    }
}
