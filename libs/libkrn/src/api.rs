//! Public entry points, in the shape of the Windows API they emulate.
//!
//! Failures are returned as `Err` and recorded as the calling thread's last error.

use krnapi::{
    Access, Error, Handle, HandleFlags, MutexFlags, ProcessTimes, SemaphoreFlags,
    ThreadCreationFlags, ThreadPriority, ThreadTimes, Timeout, WaitStatus, STILL_ACTIVE,
};
use libposix::{process, shm::Creation, thread as native};

use crate::{
    error::{set_last_error, ResultExt},
    kobject::{exit_current, Mutex, Semaphore, Thread, ThreadTarget, HANDLES},
    KrnResult,
};

fn handle_flags(inherit: bool) -> HandleFlags {
    if inherit {
        HandleFlags::INHERIT
    } else {
        HandleFlags::empty()
    }
}

/// Soft signal of named creations
fn record_creation(creation: Creation) {
    set_last_error(match creation {
        Creation::Created => None,
        Creation::Opened => Some(Error::AlreadyExists),
    });
}

fn thread_target(handle: Handle, required: Access) -> KrnResult<ThreadTarget> {
    if handle == Handle::CURRENT_THREAD {
        return Ok(ThreadTarget::Current);
    }

    HANDLES.get_thread(handle, required).map(ThreadTarget::Object)
}

/// Close a handle. The object goes away with its last handle.
pub fn close_handle(handle: Handle) -> KrnResult<()> {
    if handle == Handle::CURRENT_THREAD {
        return Ok(());
    }

    HANDLES.close(handle).record("close_handle")
}

/// Open a second handle on the same object, with the same access rights
pub fn duplicate_handle(handle: Handle) -> KrnResult<Handle> {
    HANDLES.duplicate(handle).record("duplicate_handle")
}

pub fn get_handle_information(handle: Handle) -> KrnResult<HandleFlags> {
    HANDLES.flags(handle).record("get_handle_information")
}

/// Update the handle flags selected by `mask`
pub fn set_handle_information(handle: Handle, mask: HandleFlags, flags: HandleFlags) -> KrnResult<()> {
    HANDLES
        .set_flags(handle, mask, flags)
        .record("set_handle_information")
}

/// Wait until the object is signaled: a mutex is acquired, a semaphore unit
/// is taken, a thread has ended.
pub fn wait_for_single_object(handle: Handle, timeout: Timeout) -> KrnResult<WaitStatus> {
    HANDLES.wait(handle, timeout).record("wait_for_single_object")
}

/// Create a recursive mutex, anonymous if `name` is `None` or empty.
///
/// Opening an existing named mutex succeeds with the last error set to
/// [`Error::AlreadyExists`].
pub fn create_mutex(name: Option<&str>, flags: MutexFlags, access: Access) -> KrnResult<Handle> {
    let name = name.filter(|name| !name.is_empty());

    let (mutex, creation) =
        Mutex::create(name, flags.contains(MutexFlags::INITIAL_OWNER)).record("create_mutex")?;
    let handle = HANDLES
        .open_mutex(mutex, access, HandleFlags::empty())
        .record("create_mutex")?;

    record_creation(creation);
    Ok(handle)
}

pub fn open_mutex(access: Access, inherit: bool, name: &str) -> KrnResult<Handle> {
    Mutex::open(name)
        .and_then(|mutex| HANDLES.open_mutex(mutex, access, handle_flags(inherit)))
        .record("open_mutex")
}

/// Release one level of ownership, failing with [`Error::NotOwner`] if the
/// calling thread does not own the mutex
pub fn release_mutex(handle: Handle) -> KrnResult<()> {
    HANDLES
        .get_mutex(handle, Access::MUTEX_MODIFY_STATE)
        .and_then(|mutex| mutex.release())
        .record("release_mutex")
}

/// Create a counting semaphore, anonymous if `name` is `None` or empty.
///
/// Fails with [`Error::BadArguments`] unless `0 <= initial <= max` and `max > 0`.
pub fn create_semaphore(
    initial: i32,
    max: i32,
    name: Option<&str>,
    _flags: SemaphoreFlags,
    access: Access,
) -> KrnResult<Handle> {
    let name = name.filter(|name| !name.is_empty());

    let (semaphore, creation) = Semaphore::create(name, initial, max).record("create_semaphore")?;
    let handle = HANDLES
        .open_semaphore(semaphore, access, HandleFlags::empty())
        .record("create_semaphore")?;

    record_creation(creation);
    Ok(handle)
}

pub fn open_semaphore(access: Access, inherit: bool, name: &str) -> KrnResult<Handle> {
    Semaphore::open(name)
        .and_then(|semaphore| HANDLES.open_semaphore(semaphore, access, handle_flags(inherit)))
        .record("open_semaphore")
}

/// Add `count` units, returning the previous count
pub fn release_semaphore(handle: Handle, count: i32) -> KrnResult<i32> {
    HANDLES
        .get_semaphore(handle, Access::SEMAPHORE_MODIFY_STATE)
        .and_then(|semaphore| semaphore.release(count))
        .record("release_semaphore")
}

/// Start a thread running `start`, whose return value becomes the exit code.
///
/// Returns the handle and the thread id. With
/// [`ThreadCreationFlags::CREATE_SUSPENDED`], `start` only runs after
/// [`resume_thread`].
pub fn create_thread<Entry>(
    stack_size: usize,
    start: Entry,
    flags: ThreadCreationFlags,
) -> KrnResult<(Handle, u32)>
where
    Entry: FnOnce() -> u32 + Send + 'static,
{
    spawn_thread(stack_size, start, flags).record("create_thread")
}

fn spawn_thread<Entry>(
    stack_size: usize,
    start: Entry,
    flags: ThreadCreationFlags,
) -> KrnResult<(Handle, u32)>
where
    Entry: FnOnce() -> u32 + Send + 'static,
{
    let thread = Thread::spawn(stack_size, start)?;
    let tid = thread.tid();
    let handle = HANDLES.open_thread(thread.clone(), Access::empty(), HandleFlags::empty())?;

    if !flags.contains(ThreadCreationFlags::CREATE_SUSPENDED) {
        if let Err(err) = thread.resume() {
            let _ = HANDLES.close(handle);
            return Err(err);
        }
    }

    Ok((handle, tid))
}

/// Threads cannot be opened by id
pub fn open_thread(_access: Access, _inherit: bool, _thread_id: u32) -> KrnResult<Handle> {
    Err(Error::NotImplemented).record("open_thread")
}

/// Let a thread run: releases a suspended start, or continues a stopped thread
pub fn resume_thread(handle: Handle) -> KrnResult<()> {
    thread_target(handle, Access::THREAD_SUSPEND_RESUME)
        .and_then(|thread| thread.resume())
        .record("resume_thread")
}

/// Stop a thread with a job-control signal.
///
/// Without a `SIGTSTP` handler installed by the application this stops the
/// whole process, not only the target thread.
pub fn suspend_thread(handle: Handle) -> KrnResult<()> {
    thread_target(handle, Access::THREAD_SUSPEND_RESUME)
        .and_then(|thread| thread.suspend())
        .record("suspend_thread")
}

/// Forcibly end a thread with `exit_code`.
///
/// Waiters are released at once. A thread that was never resumed ends
/// without running its entry point.
///
/// # Safety
///
/// A running entry point is stopped wherever it stands: locks it holds stay
/// held and nothing it owns is dropped.
pub unsafe fn terminate_thread(handle: Handle, exit_code: u32) -> KrnResult<()> {
    HANDLES
        .get_thread(handle, Access::THREAD_TERMINATE)
        .and_then(|thread| thread.terminate(exit_code))
        .record("terminate_thread")
}

/// End the calling thread with `code`
pub fn exit_thread(code: u32) -> ! {
    exit_current(code)
}

/// Exit code of the thread, [`STILL_ACTIVE`] while it runs
pub fn get_exit_code_thread(handle: Handle) -> KrnResult<u32> {
    thread_target(handle, Access::THREAD_QUERY_INFORMATION)
        .map(|thread| thread.exit_code())
        .record("get_exit_code_thread")
}

pub fn get_thread_times(handle: Handle) -> KrnResult<ThreadTimes> {
    thread_target(handle, Access::THREAD_QUERY_INFORMATION)
        .and_then(|thread| thread.times())
        .record("get_thread_times")
}

pub fn get_thread_priority(handle: Handle) -> KrnResult<ThreadPriority> {
    thread_target(handle, Access::THREAD_QUERY_INFORMATION)
        .and_then(|thread| thread.priority())
        .record("get_thread_priority")
}

/// Fails with [`Error::NotSupported`] for anything but
/// [`ThreadPriority::Normal`] unless the thread runs a realtime policy.
pub fn set_thread_priority(handle: Handle, priority: ThreadPriority) -> KrnResult<()> {
    thread_target(handle, Access::THREAD_SET_INFORMATION)
        .and_then(|thread| thread.set_priority(priority))
        .record("set_thread_priority")
}

/// Restrict the thread to the CPUs in `mask`, returning the previous mask
pub fn set_thread_affinity_mask(handle: Handle, mask: usize) -> KrnResult<usize> {
    thread_target(handle, Access::THREAD_SET_INFORMATION)
        .and_then(|thread| thread.set_affinity(mask))
        .record("set_thread_affinity_mask")
}

pub fn get_thread_id(handle: Handle) -> KrnResult<u32> {
    thread_target(handle, Access::THREAD_QUERY_INFORMATION)
        .map(|thread| thread.tid())
        .record("get_thread_id")
}

pub fn get_current_thread_id() -> u32 {
    native::current_thread_id()
}

/// Yield the processor
pub fn switch_to_thread() -> bool {
    native::yield_now();
    true
}

pub fn current_process_id() -> u32 {
    process::current_process_id()
}

/// Only the calling process can be queried
pub fn get_exit_code_process(pid: u32) -> KrnResult<u32> {
    if pid == current_process_id() {
        Ok(STILL_ACTIVE)
    } else {
        Err(Error::NotImplemented).record("get_exit_code_process")
    }
}

/// Only the calling process can be queried
pub fn get_process_times(pid: u32) -> KrnResult<ProcessTimes> {
    if pid != current_process_id() {
        return Err(Error::NotImplemented).record("get_process_times");
    }

    process::cpu_times()
        .map(|times| ProcessTimes {
            kernel: times.kernel,
            user: times.user,
        })
        .record("get_process_times")
}
