//! Anonymous pipes, used to report thread start-up and to signal thread exit.

use core::ffi::c_int;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use krnapi::{Error, Timeout};

use crate::{
    errno, last_os_error, ret_to_result,
    time::{Deadline, POLL_CLOCK},
    PosixResult,
};

/// Create a close-on-exec pipe, returning `(reader, writer)`
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub fn pipe() -> PosixResult<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1; 2];
    ret_to_result(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;

    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Create a close-on-exec pipe, returning `(reader, writer)`.
///
/// Without `pipe2`, a `fork` racing this call may inherit both ends.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub fn pipe() -> PosixResult<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1; 2];
    ret_to_result(unsafe { libc::pipe(fds.as_mut_ptr()) })?;

    let reader = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let writer = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    for fd in [&reader, &writer] {
        ret_to_result(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }

    Ok((reader, writer))
}

pub fn write_all(fd: BorrowedFd<'_>, mut bytes: &[u8]) -> PosixResult<()> {
    while !bytes.is_empty() {
        let written = unsafe { libc::write(fd.as_raw_fd(), bytes.as_ptr().cast(), bytes.len()) };
        if written == -1 {
            if errno() == libc::EINTR {
                continue;
            }
            return Err(last_os_error());
        }

        bytes = &bytes[written as usize..];
    }

    Ok(())
}

/// Fails with [`Error::GenFailure`] if the writer closed early
pub fn read_exact(fd: BorrowedFd<'_>, mut buf: &mut [u8]) -> PosixResult<()> {
    while !buf.is_empty() {
        let read = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        match read {
            -1 if errno() == libc::EINTR => continue,
            -1 => return Err(last_os_error()),
            0 => return Err(Error::GenFailure),
            read => buf = &mut buf[read as usize..],
        }
    }

    Ok(())
}

/// Wait until every writer of the pipe is closed.
///
/// Returns `false` on timeout. The pipe must hold no unread data.
pub fn wait_hangup(fd: BorrowedFd<'_>, timeout: Timeout) -> PosixResult<bool> {
    let deadline = match timeout {
        Timeout::Infinite => None,
        Timeout::Millis(ms) => Some(Deadline::after(ms, POLL_CLOCK)),
    };

    loop {
        let poll_timeout: c_int = match &deadline {
            None => -1,
            Some(deadline) => {
                // Round up so that a sub-millisecond remainder still sleeps
                let remaining = deadline.remaining();
                remaining
                    .as_millis()
                    .saturating_add(u128::from(remaining.subsec_nanos() % 1_000_000 != 0))
                    .min(c_int::MAX as u128) as c_int
            }
        };

        let mut pollfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        match unsafe { libc::poll(&mut pollfd, 1, poll_timeout) } {
            -1 if errno() == libc::EINTR => continue,
            -1 => return Err(last_os_error()),
            0 => {
                if deadline.as_ref().is_some_and(Deadline::is_elapsed) {
                    return Ok(false);
                }
            }
            _ => {
                if pollfd.revents & (libc::POLLHUP | libc::POLLIN | libc::POLLERR) != 0 {
                    return Ok(true);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn round_trip_then_hangup() {
        let (reader, writer) = pipe().unwrap();

        write_all(writer.as_fd(), &42u32.to_ne_bytes()).unwrap();
        let mut buf = [0u8; 4];
        read_exact(reader.as_fd(), &mut buf).unwrap();
        assert_eq!(u32::from_ne_bytes(buf), 42);

        assert_eq!(wait_hangup(reader.as_fd(), Timeout::Millis(10)), Ok(false));

        drop(writer);
        assert_eq!(wait_hangup(reader.as_fd(), Timeout::Millis(0)), Ok(true));
        assert_eq!(wait_hangup(reader.as_fd(), Timeout::Infinite), Ok(true));
    }

    #[test]
    fn both_ends_close_on_exec() {
        let (reader, writer) = pipe().unwrap();

        for fd in [&reader, &writer] {
            let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
            assert!(flags != -1);
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
    }

    #[test]
    fn early_close() {
        let (reader, writer) = pipe().unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        assert_eq!(read_exact(reader.as_fd(), &mut buf), Err(Error::GenFailure));
    }
}
