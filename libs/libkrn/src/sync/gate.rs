use core::{cell::UnsafeCell, ptr};

use libposix::{MutexKind, RawCondvar, RawMutex};

use crate::{
    kobject::storage::{NativeObject, Private},
    KrnResult,
};

#[repr(C)]
struct GateState {
    lock: RawMutex,
    cond: RawCondvar,
    open: UnsafeCell<bool>,
}

// `open` is only accessed with `lock` held
unsafe impl Send for GateState {}
unsafe impl Sync for GateState {}

impl NativeObject for GateState {
    type Params = ();

    unsafe fn init(this: *mut Self, shared: bool, _params: &()) -> KrnResult<()> {
        RawMutex::init(ptr::addr_of_mut!((*this).lock), MutexKind::Normal, shared)?;

        if let Err(err) = RawCondvar::init(ptr::addr_of_mut!((*this).cond), shared) {
            (*this).lock.destroy();
            return Err(err);
        }

        ptr::addr_of_mut!((*this).open).write(UnsafeCell::new(false));
        Ok(())
    }

    unsafe fn destroy(&self) {
        self.cond.destroy();
        self.lock.destroy();
    }
}

/// One-shot latch holding a new thread back until it is opened
pub struct StartGate {
    state: Private<GateState>,
}

impl StartGate {
    pub fn new() -> KrnResult<Self> {
        Ok(Self {
            state: Private::new(&())?,
        })
    }

    /// Open the gate. Returns `false` if it was already open.
    pub fn open(&self) -> KrnResult<bool> {
        let state = &*self.state;

        state.lock.lock()?;
        let was_closed = unsafe { !state.open.get().replace(true) };
        let res = if was_closed {
            state.cond.broadcast()
        } else {
            Ok(())
        };
        state.lock.unlock()?;

        res.map(|_| was_closed)
    }

    pub fn is_open(&self) -> KrnResult<bool> {
        let state = &*self.state;

        state.lock.lock()?;
        let open = unsafe { *state.open.get() };
        state.lock.unlock()?;

        Ok(open)
    }

    /// Block until the gate is opened
    pub fn wait(&self) -> KrnResult<()> {
        let state = &*self.state;

        state.lock.lock()?;
        let mut res = Ok(());
        while unsafe { !*state.open.get() } {
            res = state.cond.wait(&state.lock);
            if res.is_err() {
                break;
            }
        }
        state.lock.unlock()?;

        res
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn holds_until_opened() {
        let gate = Arc::new(StartGate::new().unwrap());
        let passed = Arc::new(AtomicBool::new(false));

        let waiter = {
            let gate = gate.clone();
            let passed = passed.clone();
            thread::spawn(move || {
                gate.wait().unwrap();
                passed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));
        assert!(!gate.is_open().unwrap());

        assert!(gate.open().unwrap());
        waiter.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));

        assert!(!gate.open().unwrap());
        gate.wait().unwrap();
    }
}
