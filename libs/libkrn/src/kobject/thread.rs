use core::{any::Any, cell::RefCell, ffi::c_void, ptr};
use std::{
    os::fd::{AsFd, OwnedFd},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use krnapi::{Error, FileTime, ThreadPriority, ThreadTimes, Timeout, WaitStatus, STILL_ACTIVE};
use libposix::{
    pipe,
    thread::{self as native, CpuTimes, RawThread},
    time::now_filetime,
};
use log::{debug, error, trace, warn};

use super::{KObject, ObjectHeader, TypeDescriptor, THREAD_TYPE};
use crate::{sync::StartGate, KrnResult};

/// Exit code of a thread whose body panicked
pub const PANIC_EXIT_CODE: u32 = 0xFFFF_FFFF;

type ThreadBody = Box<dyn FnOnce() -> u32 + Send + 'static>;

/// Unwinding payload used by [`exit_current`]
struct ExitRequest(u32);

#[derive(Debug, Default)]
struct ThreadRecord {
    creation: FileTime,
    exit_time: FileTime,
    exit_code: Option<u32>,
    /// CPU times frozen when the body ended
    times: Option<CpuTimes>,
    /// The body returned: the native thread is about to end and may be joined
    finished: bool,
    terminated: bool,
    /// Creation failed after spawning: the body must not run
    aborted: bool,
}

/// State shared between a thread object and the running thread
struct ThreadShared {
    gate: StartGate,
    record: spin::Mutex<ThreadRecord>,
    /// Closed when the thread ends, waking up waiters polling the read end
    exit_writer: spin::Mutex<Option<OwnedFd>>,
}

impl ThreadShared {
    /// Record the exit code unless one is already set (exit or terminate)
    fn set_exit(&self, code: u32) {
        let mut record = self.record.lock();
        if record.exit_code.is_none() {
            record.exit_code = Some(code);
            record.exit_time = now_filetime();
        }
    }

    fn signal_exit(&self) {
        self.exit_writer.lock().take();
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadShared>>> = const { RefCell::new(None) };
}

struct ThreadStart {
    shared: Arc<ThreadShared>,
    body: ThreadBody,
}

/// Thread
pub struct Thread {
    header: ObjectHeader,
    native: RawThread,
    tid: u32,
    shared: Arc<ThreadShared>,
    exit_reader: OwnedFd,
}

// `native` is an opaque thread id, valid until joined or detached on drop
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread").field("tid", &self.tid).finish()
    }
}

impl Thread {
    /// Start a new thread. It stays behind its start gate until [`Thread::resume`].
    ///
    /// A `stack_size` of zero keeps the platform default.
    pub fn spawn<Entry>(stack_size: usize, entry: Entry) -> KrnResult<Arc<Self>>
    where
        Entry: FnOnce() -> u32 + Send + 'static,
    {
        let (exit_reader, exit_writer) = pipe::pipe()?;

        let shared = Arc::new(ThreadShared {
            gate: StartGate::new()?,
            record: spin::Mutex::new(ThreadRecord {
                creation: now_filetime(),
                ..Default::default()
            }),
            exit_writer: spin::Mutex::new(Some(exit_writer)),
        });

        let start = Box::new(ThreadStart {
            shared: shared.clone(),
            body: Box::new(entry),
        });
        let arg = Box::into_raw(start).cast::<c_void>();

        let native = match unsafe { native::spawn(stack_size, Self::thread_entry, arg) } {
            Ok(native) => native,
            Err(err) => {
                // The thread never started, take the parameter back
                drop(unsafe { Box::from_raw(arg.cast::<ThreadStart>()) });
                return Err(err);
            }
        };

        let mut buf = [0u8; 4];
        if let Err(err) = pipe::read_exact(exit_reader.as_fd(), &mut buf) {
            warn!("thread did not report its id: {}", err);
            shared.record.lock().aborted = true;
            let _ = shared.gate.open();
            let _ = native::detach(native);
            return Err(err);
        }
        let tid = u32::from_ne_bytes(buf);

        debug!("thread {} created", tid);

        Ok(Arc::new(Self {
            header: ObjectHeader::new(),
            native,
            tid,
            shared,
            exit_reader,
        }))
    }

    extern "C" fn thread_entry(arg: *mut c_void) -> *mut c_void {
        // Only the body may be stopped by `terminate`
        if let Err(err) = native::set_stoppable(false) {
            warn!("thread could not mask stop requests: {}", err);
        }

        let start = unsafe { Box::from_raw(arg.cast::<ThreadStart>()) };
        let ThreadStart { shared, body } = *start;

        let tid = native::current_thread_id();
        let reported = match shared.exit_writer.lock().as_ref() {
            Some(writer) => pipe::write_all(writer.as_fd(), &tid.to_ne_bytes()),
            None => Err(Error::InvalidHandle),
        };

        if reported.is_ok() {
            CURRENT.with(|current| *current.borrow_mut() = Some(shared.clone()));

            if let Err(err) = shared.gate.wait() {
                error!("thread {}: start gate failed: {}", tid, err);
                shared.record.lock().aborted = true;
            }

            let aborted = shared.record.lock().aborted;
            if !aborted {
                let code = Self::run(tid, body);
                shared.set_exit(code);
            }
        }

        let times = native::current_cpu_times().ok();
        {
            let mut record = shared.record.lock();
            record.times = times;
            record.finished = true;
        }

        CURRENT.with(|current| current.borrow_mut().take());
        shared.signal_exit();

        ptr::null_mut()
    }

    fn run(tid: u32, body: ThreadBody) -> u32 {
        let stoppable_body = move || {
            let _stoppable = Stoppable::enter();
            body()
        };

        match panic::catch_unwind(AssertUnwindSafe(stoppable_body)) {
            Ok(code) => code,
            Err(payload) => match payload.downcast::<ExitRequest>() {
                Ok(request) => request.0,
                Err(payload) => {
                    error!("thread {} panicked: {}", tid, panic_message(&*payload));
                    PANIC_EXIT_CODE
                }
            },
        }
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    pub fn native(&self) -> RawThread {
        self.native
    }

    /// Exit code, [`STILL_ACTIVE`] while running
    pub fn exit_code(&self) -> u32 {
        self.shared.record.lock().exit_code.unwrap_or(STILL_ACTIVE)
    }

    /// Let the thread run: open the start gate, or continue a suspended thread
    pub fn resume(&self) -> KrnResult<()> {
        if self.shared.gate.open()? {
            trace!("thread {} released from start gate", self.tid);
            return Ok(());
        }

        {
            let record = self.shared.record.lock();
            if record.finished || record.terminated {
                return Ok(());
            }
        }

        native::kill(self.native, libc::SIGCONT)
    }

    /// Stop the thread with `SIGTSTP`.
    ///
    /// Job-control signals act on the whole process: without a handler
    /// installed by the application, every thread stops.
    pub fn suspend(&self) -> KrnResult<()> {
        {
            let record = self.shared.record.lock();
            if record.finished || record.terminated {
                return Err(Error::InvalidHandle);
            }
        }

        native::kill(self.native, libc::SIGTSTP)
    }

    /// End the thread with `exit_code` and wake up its waiters.
    ///
    /// A thread still held at its start gate ends without running its body.
    /// A running body is stopped in place (see [`native::stop`]). Terminating
    /// a thread that already ended does nothing.
    ///
    /// # Safety
    ///
    /// The body gets no chance to clean up: locks it holds stay locked and
    /// everything it owns leaks.
    pub unsafe fn terminate(&self, exit_code: u32) -> KrnResult<()> {
        let times = native::cpu_times_of(self.tid).unwrap_or_default();

        {
            let mut record = self.shared.record.lock();
            if record.finished || record.exit_code.is_some() {
                return Ok(());
            }
            record.terminated = true;
            record.aborted = true;
            record.exit_code = Some(exit_code);
            record.exit_time = now_filetime();
            record.times = Some(times);
        }

        let gated = self.shared.gate.open()?;
        self.shared.signal_exit();

        if gated {
            debug!("thread {} terminated at its start gate with {}", self.tid, exit_code);
            return Ok(());
        }

        native::stop(self.native)?;
        debug!("thread {} terminated with {}", self.tid, exit_code);
        Ok(())
    }

    pub fn times(&self) -> KrnResult<ThreadTimes> {
        let (creation, exit_time, frozen) = {
            let record = self.shared.record.lock();
            (record.creation, record.exit_time, record.times)
        };

        let times = match frozen {
            Some(times) => times,
            None if self.tid == native::current_thread_id() => native::current_cpu_times()?,
            None => native::cpu_times_of(self.tid)?,
        };

        Ok(ThreadTimes {
            creation,
            exit: exit_time,
            kernel: times.kernel,
            user: times.user,
        })
    }
}

impl KObject for Thread {
    fn descriptor(&self) -> &'static TypeDescriptor {
        &THREAD_TYPE
    }

    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn wait(&self, timeout: Timeout) -> KrnResult<WaitStatus> {
        trace!("thread {} wait {:?}", self.tid, timeout);

        Ok(if pipe::wait_hangup(self.exit_reader.as_fd(), timeout)? {
            WaitStatus::Signaled
        } else {
            WaitStatus::TimedOut
        })
    }

    fn close(&self) {
        debug!("thread {} closed", self.tid);
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        let (finished, terminated) = {
            let record = self.shared.record.lock();
            (record.finished, record.terminated)
        };

        // Nobody can resume a thread still at its start gate anymore: let it end without running
        if !finished && matches!(self.shared.gate.is_open(), Ok(false)) {
            self.shared.record.lock().aborted = true;
            let _ = self.shared.gate.open();
        }

        let res = if finished && !terminated {
            native::join(self.native)
        } else {
            native::detach(self.native)
        };

        if let Err(err) = res {
            warn!("could not reclaim thread {}: {}", self.tid, err);
        }
    }
}

/// Opens the calling thread to stop requests until dropped
struct Stoppable;

impl Stoppable {
    fn enter() -> Self {
        if let Err(err) = native::set_stoppable(true) {
            warn!("thread cannot be terminated: {}", err);
        }
        Stoppable
    }
}

impl Drop for Stoppable {
    fn drop(&mut self) {
        if let Err(err) = native::set_stoppable(false) {
            warn!("thread could not mask stop requests: {}", err);
        }
    }
}

/// Thread designated by a handle, or the calling thread
pub enum ThreadTarget {
    Object(Arc<Thread>),
    Current,
}

impl ThreadTarget {
    pub fn native(&self) -> RawThread {
        match self {
            ThreadTarget::Object(thread) => thread.native(),
            ThreadTarget::Current => native::current(),
        }
    }

    pub fn tid(&self) -> u32 {
        match self {
            ThreadTarget::Object(thread) => thread.tid(),
            ThreadTarget::Current => native::current_thread_id(),
        }
    }

    pub fn exit_code(&self) -> u32 {
        match self {
            ThreadTarget::Object(thread) => thread.exit_code(),
            ThreadTarget::Current => STILL_ACTIVE,
        }
    }

    pub fn times(&self) -> KrnResult<ThreadTimes> {
        match self {
            ThreadTarget::Object(thread) => thread.times(),
            ThreadTarget::Current => {
                let creation = CURRENT.with(|current| {
                    current
                        .borrow()
                        .as_ref()
                        .map(|shared| shared.record.lock().creation)
                        .unwrap_or(FileTime::ZERO)
                });
                let times = native::current_cpu_times()?;

                Ok(ThreadTimes {
                    creation,
                    exit: FileTime::ZERO,
                    kernel: times.kernel,
                    user: times.user,
                })
            }
        }
    }

    pub fn resume(&self) -> KrnResult<()> {
        match self {
            ThreadTarget::Object(thread) => thread.resume(),
            // Running by definition
            ThreadTarget::Current => Ok(()),
        }
    }

    pub fn suspend(&self) -> KrnResult<()> {
        match self {
            ThreadTarget::Object(thread) => thread.suspend(),
            ThreadTarget::Current => native::kill(native::current(), libc::SIGTSTP),
        }
    }

    pub fn priority(&self) -> KrnResult<ThreadPriority> {
        native::priority(self.native())
    }

    pub fn set_priority(&self, priority: ThreadPriority) -> KrnResult<()> {
        native::set_priority(self.native(), priority)
    }

    pub fn set_affinity(&self, mask: usize) -> KrnResult<usize> {
        native::set_affinity(self.native(), mask)
    }
}

/// End the calling thread with `code`.
///
/// Threads started by [`Thread::spawn`] unwind back to their entry point,
/// running destructors on the way. Other threads unwind like a panic would,
/// without invoking the panic hook.
pub fn exit_current(code: u32) -> ! {
    panic::resume_unwind(Box::new(ExitRequest(code)))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown payload"
    }
}
