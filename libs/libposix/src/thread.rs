//! Native thread plumbing: creation, identity, stopping, scheduling, affinity and CPU times.

use core::{ffi::c_void, mem, mem::MaybeUninit, time::Duration};

use krnapi::{Error, FileTime, ThreadPriority};
use lazy_static::lazy_static;
use log::trace;

use crate::{last_os_error, rc_to_result, ret_to_result, time::timeval_to_filetime, PosixResult};

pub type RawThread = libc::pthread_t;

pub type ThreadEntry = extern "C" fn(*mut c_void) -> *mut c_void;

/// CPU time consumed, split between kernel and user mode
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct CpuTimes {
    pub kernel: FileTime,
    pub user: FileTime,
}

pub fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

/// Round a requested stack size up to the page size, never below the platform minimum
pub fn round_stack_size(size: usize) -> usize {
    let page = page_size();
    let rounded = size.div_ceil(page) * page;
    rounded.max(libc::PTHREAD_STACK_MIN)
}

/// Start a joinable native thread running `entry(arg)`.
///
/// A `stack_size` of zero keeps the platform default.
///
/// # Safety
///
/// `entry` takes ownership of `arg` and must not unwind.
pub unsafe fn spawn(stack_size: usize, entry: ThreadEntry, arg: *mut c_void) -> PosixResult<RawThread> {
    let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
    rc_to_result(libc::pthread_attr_init(attr.as_mut_ptr()))?;

    let res = spawn_with(attr.as_mut_ptr(), stack_size, entry, arg);

    libc::pthread_attr_destroy(attr.as_mut_ptr());
    res
}

unsafe fn spawn_with(
    attr: *mut libc::pthread_attr_t,
    stack_size: usize,
    entry: ThreadEntry,
    arg: *mut c_void,
) -> PosixResult<RawThread> {
    if stack_size > 0 {
        rc_to_result(libc::pthread_attr_setstacksize(attr, round_stack_size(stack_size)))?;
    }
    rc_to_result(libc::pthread_attr_setdetachstate(attr, libc::PTHREAD_CREATE_JOINABLE))?;

    let mut thread: RawThread = mem::zeroed();
    rc_to_result(libc::pthread_create(&mut thread, attr, entry, arg))?;
    Ok(thread)
}

pub fn current() -> RawThread {
    unsafe { libc::pthread_self() }
}

/// Operating system id of the calling thread
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn current_thread_id() -> u32 {
    unsafe { libc::syscall(libc::SYS_gettid) as u32 }
}

/// Operating system id of the calling thread
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn current_thread_id() -> u32 {
    let mut id: u64 = 0;
    unsafe { libc::pthread_threadid_np(0, &mut id) };
    id as u32
}

/// Operating system id of the calling thread
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub fn current_thread_id() -> u32 {
    current() as usize as u32
}

pub fn join(thread: RawThread) -> PosixResult<()> {
    rc_to_result(unsafe { libc::pthread_join(thread, core::ptr::null_mut()) })
}

pub fn detach(thread: RawThread) -> PosixResult<()> {
    rc_to_result(unsafe { libc::pthread_detach(thread) })
}

/// Signal delivered by [`stop`]
#[cfg(any(target_os = "linux", target_os = "android"))]
fn stop_signal() -> libc::c_int {
    libc::SIGRTMIN() + 2
}

/// Signal delivered by [`stop`]
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn stop_signal() -> libc::c_int {
    libc::SIGUSR2
}

lazy_static! {
    static ref STOP_HANDLER: PosixResult<()> = install_stop_handler();
}

fn install_stop_handler() -> PosixResult<()> {
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = stop_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
    ret_to_result(unsafe { libc::sigfillset(&mut action.sa_mask) })?;

    ret_to_result(unsafe { libc::sigaction(stop_signal(), &action, core::ptr::null_mut()) })?;
    trace!("stop handler installed on signal {}", stop_signal());
    Ok(())
}

/// Ends the calling thread in place: nothing is unwound and no destructor runs
extern "C" fn stop_handler(_signal: libc::c_int) {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        libc::syscall(libc::SYS_exit, 0);
    }

    // No way to end a single thread here: park it for good
    loop {
        unsafe { libc::pause() };
    }
}

/// Allow or forbid [`stop`] from acting on the calling thread.
///
/// While forbidden, a stop request stays pending. Threads spawned afterwards
/// inherit the setting.
pub fn set_stoppable(stoppable: bool) -> PosixResult<()> {
    let mut set: libc::sigset_t = unsafe { mem::zeroed() };
    ret_to_result(unsafe { libc::sigemptyset(&mut set) })?;
    ret_to_result(unsafe { libc::sigaddset(&mut set, stop_signal()) })?;

    let how = if stoppable {
        libc::SIG_UNBLOCK
    } else {
        libc::SIG_BLOCK
    };
    rc_to_result(unsafe { libc::pthread_sigmask(how, &set, core::ptr::null_mut()) })
}

/// End `thread` where it stands, as soon as it is stoppable.
///
/// On Linux the native thread exits at once. Elsewhere it is parked until
/// the process ends.
///
/// # Safety
///
/// Nothing on the thread's stack is dropped: locks it holds stay locked and
/// the memory it owns leaks.
pub unsafe fn stop(thread: RawThread) -> PosixResult<()> {
    (*STOP_HANDLER)?;
    kill(thread, stop_signal())
}

pub fn kill(thread: RawThread, signal: libc::c_int) -> PosixResult<()> {
    rc_to_result(unsafe { libc::pthread_kill(thread, signal) })
}

pub fn yield_now() {
    unsafe { libc::sched_yield() };
}

/// Scheduling policy and priority of a thread
pub fn sched_params(thread: RawThread) -> PosixResult<(libc::c_int, libc::c_int)> {
    let mut policy: libc::c_int = 0;
    let mut param: libc::sched_param = unsafe { mem::zeroed() };
    rc_to_result(unsafe { libc::pthread_getschedparam(thread, &mut policy, &mut param) })?;
    Ok((policy, param.sched_priority))
}

pub fn set_sched_priority(thread: RawThread, policy: libc::c_int, priority: libc::c_int) -> PosixResult<()> {
    let mut param: libc::sched_param = unsafe { mem::zeroed() };
    param.sched_priority = priority;
    rc_to_result(unsafe { libc::pthread_setschedparam(thread, policy, &param) })
}

pub fn priority_range(policy: libc::c_int) -> PosixResult<(libc::c_int, libc::c_int)> {
    let min = ret_to_result(unsafe { libc::sched_get_priority_min(policy) })?;
    let max = ret_to_result(unsafe { libc::sched_get_priority_max(policy) })?;
    Ok((min, max))
}

fn is_realtime(policy: libc::c_int) -> bool {
    policy == libc::SCHED_RR || policy == libc::SCHED_FIFO
}

/// Native priority for `priority` within `[min, max]` of a realtime policy.
///
/// The range is split in thirds: normal and below sit at the bottom,
/// above-normal one third up, highest one third down from the top.
pub fn native_priority(priority: ThreadPriority, min: libc::c_int, max: libc::c_int) -> libc::c_int {
    let span = max - min;
    let third = span / 3 + (span % 3) / 2;

    match priority {
        ThreadPriority::TimeCritical => max,
        ThreadPriority::Highest => max - third,
        ThreadPriority::AboveNormal => min + third,
        _ => min,
    }
}

/// Apply a priority to a thread, keeping its scheduling policy.
///
/// Under non-realtime policies only [`ThreadPriority::Normal`] can be honored.
pub fn set_priority(thread: RawThread, priority: ThreadPriority) -> PosixResult<()> {
    let (policy, _) = sched_params(thread)?;

    if !is_realtime(policy) {
        return match priority {
            ThreadPriority::Normal => Ok(()),
            _ => Err(Error::NotSupported),
        };
    }

    let (min, max) = priority_range(policy)?;
    let native = native_priority(priority, min, max);
    trace!("priority {:?} maps to {} in [{}, {}]", priority, native, min, max);

    set_sched_priority(thread, policy, native)
}

/// Priority level a thread currently runs at
pub fn priority(thread: RawThread) -> PosixResult<ThreadPriority> {
    let (policy, native) = sched_params(thread)?;
    if !is_realtime(policy) {
        return Ok(ThreadPriority::Normal);
    }

    let (min, max) = priority_range(policy)?;

    const LEVELS: [ThreadPriority; 3] = [
        ThreadPriority::TimeCritical,
        ThreadPriority::Highest,
        ThreadPriority::AboveNormal,
    ];

    Ok(LEVELS
        .into_iter()
        .find(|level| native_priority(*level, min, max) == native)
        .unwrap_or(ThreadPriority::Normal))
}

pub fn online_cpus() -> usize {
    match unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) } {
        count if count > 0 => count as usize,
        _ => 1,
    }
}

fn cpu_limit() -> usize {
    online_cpus().min(usize::BITS as usize)
}

/// Mask with the low `limit` bits set
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn limit_mask(limit: usize) -> usize {
    if limit >= usize::BITS as usize {
        usize::MAX
    } else {
        (1usize << limit) - 1
    }
}

/// Set the CPUs a thread may run on, returning the previous mask.
///
/// Both masks are truncated to the online CPUs.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn set_affinity(thread: RawThread, mask: usize) -> PosixResult<usize> {
    let limit = cpu_limit();

    let mut previous: libc::cpu_set_t = unsafe { mem::zeroed() };
    rc_to_result(unsafe {
        libc::pthread_getaffinity_np(thread, mem::size_of::<libc::cpu_set_t>(), &mut previous)
    })?;

    let mut old_mask = 0usize;
    for cpu in 0..limit {
        if unsafe { libc::CPU_ISSET(cpu, &previous) } {
            old_mask |= 1 << cpu;
        }
    }

    let mask = mask & limit_mask(limit);
    if mask == 0 {
        return Err(Error::InvalidParameter);
    }

    let mut next: libc::cpu_set_t = unsafe { mem::zeroed() };
    for cpu in 0..limit {
        if mask & (1 << cpu) != 0 {
            unsafe { libc::CPU_SET(cpu, &mut next) };
        }
    }

    rc_to_result(unsafe {
        libc::pthread_setaffinity_np(thread, mem::size_of::<libc::cpu_set_t>(), &next)
    })?;

    Ok(old_mask)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn set_affinity(_thread: RawThread, _mask: usize) -> PosixResult<usize> {
    let _ = cpu_limit();
    Err(Error::NotImplemented)
}

/// CPU times of the calling thread
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn current_cpu_times() -> PosixResult<CpuTimes> {
    let mut usage: libc::rusage = unsafe { mem::zeroed() };
    ret_to_result(unsafe { libc::getrusage(libc::RUSAGE_THREAD, &mut usage) })?;

    Ok(CpuTimes {
        kernel: timeval_to_filetime(&usage.ru_stime),
        user: timeval_to_filetime(&usage.ru_utime),
    })
}

/// CPU times of the calling thread (not split between kernel and user)
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn current_cpu_times() -> PosixResult<CpuTimes> {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    ret_to_result(unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) })?;

    Ok(CpuTimes {
        kernel: FileTime::ZERO,
        user: crate::time::timespec_to_filetime(&ts),
    })
}

/// CPU times of another thread of this process, by id
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn cpu_times_of(tid: u32) -> PosixResult<CpuTimes> {
    let path = format!("/proc/self/task/{}/stat", tid);
    let content = std::fs::read_to_string(&path).map_err(|err| match err.raw_os_error() {
        Some(errno) => crate::translate_errno(errno),
        None => Error::GenFailure,
    })?;

    let hz = match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
        hz if hz > 0 => hz as u64,
        _ => return Err(last_os_error()),
    };

    let (utime, stime) = parse_stat_times(&content).ok_or(Error::GenFailure)?;

    Ok(CpuTimes {
        kernel: FileTime::from_duration(ticks_to_duration(stime, hz)),
        user: FileTime::from_duration(ticks_to_duration(utime, hz)),
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn cpu_times_of(_tid: u32) -> PosixResult<CpuTimes> {
    Err(Error::NotImplemented)
}

/// `utime` and `stime` (fields 14 and 15) of a `/proc/<pid>/task/<tid>/stat` line
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn parse_stat_times(content: &str) -> Option<(u64, u64)> {
    // The command name may contain spaces and parentheses
    let (_, rest) = content.rsplit_once(')')?;
    let mut fields = rest.split_whitespace().skip(11);

    let utime = fields.next()?.parse().ok()?;
    let stime = fields.next()?.parse().ok()?;
    Some((utime, stime))
}

#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn ticks_to_duration(ticks: u64, hz: u64) -> Duration {
    Duration::from_secs(ticks / hz) + Duration::from_nanos((ticks % hz) * 1_000_000_000 / hz)
}
