use core::{mem, time::Duration};
use std::time::{SystemTime, UNIX_EPOCH};

use krnapi::FileTime;

const NANOS_PER_SEC: libc::c_long = 1_000_000_000;
const NANOS_PER_MILLI: libc::c_long = 1_000_000;

/// Clock used by `pthread_mutex_timedlock`
pub const MUTEX_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

/// Clock configured on condition variables
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub const CONDVAR_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub const CONDVAR_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

/// Clock used for relative waits computed in user space (poll loops)
pub const POLL_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Absolute point in time on a given clock
#[derive(Clone, Copy)]
pub struct Deadline {
    clock: libc::clockid_t,
    at: libc::timespec,
}

impl Deadline {
    /// Deadline `milliseconds` from now on `clock`
    pub fn after(milliseconds: u32, clock: libc::clockid_t) -> Self {
        let now = now(clock);

        let mut sec = now.tv_sec + (milliseconds / 1000) as libc::time_t;
        let mut nsec = now.tv_nsec + (milliseconds % 1000) as libc::c_long * NANOS_PER_MILLI;
        if nsec >= NANOS_PER_SEC {
            sec += 1;
            nsec -= NANOS_PER_SEC;
        }

        let mut at: libc::timespec = unsafe { mem::zeroed() };
        at.tv_sec = sec;
        at.tv_nsec = nsec;

        Self { clock, at }
    }

    pub fn as_timespec(&self) -> &libc::timespec {
        &self.at
    }

    /// Time left before the deadline, zero once elapsed
    pub fn remaining(&self) -> Duration {
        let now = now(self.clock);

        let target = timespec_to_duration(&self.at);
        let current = timespec_to_duration(&now);

        target.saturating_sub(current)
    }

    pub fn is_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }
}

fn now(clock: libc::clockid_t) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    // Only fails on an invalid clock id, all ids used here are valid
    unsafe { libc::clock_gettime(clock, &mut ts) };
    ts
}

fn timespec_to_duration(ts: &libc::timespec) -> Duration {
    Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.max(0) as u32)
}

/// Current wall clock time as a timestamp
pub fn now_filetime() -> FileTime {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);

    FileTime::from_unix(since_epoch)
}

pub fn timeval_to_filetime(tv: &libc::timeval) -> FileTime {
    FileTime::from_duration(Duration::new(
        tv.tv_sec.max(0) as u64,
        (tv.tv_usec.max(0) as u32) * 1000,
    ))
}

pub fn timespec_to_filetime(ts: &libc::timespec) -> FileTime {
    FileTime::from_duration(timespec_to_duration(ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_normalized() {
        for ms in [0, 1, 999, 1000, 1999, 123_456] {
            let deadline = Deadline::after(ms, POLL_CLOCK);
            let at = deadline.as_timespec();

            assert!(at.tv_nsec >= 0 && at.tv_nsec < NANOS_PER_SEC);
            assert!(deadline.remaining() <= Duration::from_millis(ms as u64));
        }
    }

    #[test]
    fn zero_deadline_is_elapsed() {
        let deadline = Deadline::after(0, POLL_CLOCK);
        assert!(deadline.is_elapsed());
    }

    #[test]
    fn long_deadline_is_pending() {
        let deadline = Deadline::after(60_000, CONDVAR_CLOCK);
        assert!(!deadline.is_elapsed());
        assert!(deadline.remaining() > Duration::from_secs(59));
    }
}
