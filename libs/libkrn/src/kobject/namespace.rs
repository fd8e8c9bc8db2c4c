//! Process-local registry of named segments.
//!
//! Liveness of a segment across processes relies on `fcntl` record locks,
//! which belong to the process and are dropped as soon as any descriptor on
//! the file is closed. Every name is therefore attached at most once per
//! process, and shared by all objects opened on it here.

use std::sync::Arc;

use hashbrown::HashMap;
use krnapi::Error;
use lazy_static::lazy_static;
use libposix::{shm::Creation, thread};
use log::{debug, warn};

use super::storage::{NativeObject, Segment, SegmentLink};
use crate::KrnResult;

struct Entry {
    segment: Arc<dyn SegmentLink>,
    opens: usize,
}

impl Entry {
    fn get<T: NativeObject>(&mut self) -> KrnResult<Arc<Segment<T>>> {
        let segment = self
            .segment
            .clone()
            .as_any()
            .downcast::<Segment<T>>()
            .map_err(|_| Error::InvalidHandle)?;

        self.opens += 1;
        Ok(segment)
    }
}

/// A name is marked `Attaching` while its segment is resolved without the namespace lock
enum Slot {
    Attaching,
    Attached(Entry),
}

lazy_static! {
    static ref NAMESPACE: spin::Mutex<HashMap<String, Slot>> = spin::Mutex::new(HashMap::new());
}

/// Create the named object, or open it if it exists in this or another process
pub fn create<T: NativeObject>(
    name: &str,
    params: &T::Params,
) -> KrnResult<(Arc<Segment<T>>, Creation)> {
    attach(name, || Segment::<T>::create(name, params))
}

/// Open an existing named object
pub fn open<T: NativeObject>(name: &str) -> KrnResult<Arc<Segment<T>>> {
    attach(name, || Segment::<T>::open(name).map(|segment| (segment, Creation::Opened)))
        .map(|(segment, _)| segment)
}

/// Share the segment already attached under `name`, or attach it with `attach_segment`.
///
/// Attaching may block on another process initializing the segment, so it
/// runs with the namespace unlocked. Other callers for the same name wait for
/// it to settle.
fn attach<T, F>(name: &str, attach_segment: F) -> KrnResult<(Arc<Segment<T>>, Creation)>
where
    T: NativeObject,
    F: FnOnce() -> KrnResult<(Segment<T>, Creation)>,
{
    loop {
        {
            let mut namespace = NAMESPACE.lock();

            match namespace.get_mut(name) {
                Some(Slot::Attached(entry)) => return Ok((entry.get()?, Creation::Opened)),
                Some(Slot::Attaching) => {}
                None => {
                    namespace.insert(name.into(), Slot::Attaching);
                    break;
                }
            }
        }

        thread::yield_now();
    }

    let res = attach_segment();

    let mut namespace = NAMESPACE.lock();
    match res {
        Ok((segment, creation)) => {
            let segment = Arc::new(segment);
            debug!("attached segment {} ({:?})", name, creation);

            namespace.insert(
                name.into(),
                Slot::Attached(Entry {
                    segment: segment.clone(),
                    opens: 1,
                }),
            );

            Ok((segment, creation))
        }
        Err(err) => {
            namespace.remove(name);
            Err(err)
        }
    }
}

/// Drop one open of `name`; the last one detaches the segment
pub fn release(name: &str) {
    let mut namespace = NAMESPACE.lock();

    let Some(Slot::Attached(entry)) = namespace.get_mut(name) else {
        warn!("release of unattached segment {}", name);
        return;
    };

    entry.opens -= 1;
    if entry.opens > 0 {
        return;
    }

    if let Some(Slot::Attached(entry)) = namespace.remove(name) {
        debug!("detaching segment {}", name);
        entry.segment.detach();
    }
}
