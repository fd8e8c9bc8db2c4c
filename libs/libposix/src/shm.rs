//! Named shared memory segments with liveness tracked through `fcntl` record locks.
//!
//! Every process attached to a segment holds a shared (read) lock on its
//! descriptor. A creator holds an exclusive (write) lock while it initializes
//! the contents, then downgrades it to publish the segment. A segment that
//! exists but carries no lock at all is stale and may be reinitialized.
//!
//! Record locks are owned by the process, so callers must keep exactly one
//! `SharedMemory` per name and per process.

use core::{
    ffi::{c_int, c_short},
    mem,
    ptr::NonNull,
};
use std::{
    ffi::{CStr, CString},
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};

use krnapi::{Error, NAME_MAX};
use log::{debug, trace, warn};

use crate::{errno, last_os_error, ret_to_result, PosixResult};

/// Retries when racing other processes on creation
pub const CREATE_ATTEMPTS: usize = 16;

const READ_LOCK: c_short = libc::F_RDLCK as c_short;
const WRITE_LOCK: c_short = libc::F_WRLCK as c_short;
const UNLOCKED: c_short = libc::F_UNLCK as c_short;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Creation {
    /// The caller created (or reclaimed) the segment and must initialize it, then publish
    Created,
    /// The segment was live and initialized
    Opened,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Probe {
    Unused,
    Readers,
    Initializing,
}

/// Build the segment path for a user supplied name
pub fn segment_name(name: &str) -> PosixResult<CString> {
    if name.is_empty() || name.len() + 1 > NAME_MAX || name.contains(['/', '\0']) {
        return Err(Error::BadArguments);
    }

    CString::new(format!("/{}", name)).map_err(|_| Error::BadArguments)
}

#[derive(Debug)]
pub struct SharedMemory {
    path: CString,
    fd: spin::Mutex<Option<OwnedFd>>,
    addr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Create the named segment, or attach to it if another process already published it.
    ///
    /// With [`Creation::Created`], the caller still holds the exclusive lock and
    /// must call [`SharedMemory::publish`] (or [`SharedMemory::abandon`]).
    pub fn create(name: &str, len: usize) -> PosixResult<(Self, Creation)> {
        let path = segment_name(name)?;

        for attempt in 0..CREATE_ATTEMPTS {
            match open_fd(&path, libc::O_RDWR) {
                Ok(fd) => match probe(&fd)? {
                    Probe::Unused => {
                        if try_lock(&fd, WRITE_LOCK)? {
                            debug!("reclaiming stale segment {:?}", path);
                            return Self::establish(path, fd, len).map(|shm| (shm, Creation::Created));
                        }
                    }
                    Probe::Readers | Probe::Initializing => {
                        if let Some(shm) = Self::join(&path, fd, len)? {
                            return Ok((shm, Creation::Opened));
                        }
                    }
                },
                Err(Error::NotFound) => {
                    match open_fd(&path, libc::O_RDWR | libc::O_CREAT | libc::O_EXCL) {
                        Ok(fd) => {
                            if try_lock(&fd, WRITE_LOCK)? {
                                return Self::establish(path, fd, len)
                                    .map(|shm| (shm, Creation::Created));
                            }
                        }
                        Err(Error::AlreadyExists) => {}
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }

            trace!("lost creation race on {:?} (attempt {})", path, attempt);
        }

        Err(Error::Busy)
    }

    /// Attach to a live segment
    pub fn open(name: &str, len: usize) -> PosixResult<Self> {
        let path = segment_name(name)?;
        let fd = open_fd(&path, libc::O_RDWR)?;

        if probe(&fd)? == Probe::Unused {
            return Err(Error::NotFound);
        }

        Self::join(&path, fd, len)?.ok_or(Error::NotFound)
    }

    /// Size, map and take ownership of a segment the caller holds exclusively.
    /// On failure the segment is removed.
    fn establish(path: CString, fd: OwnedFd, len: usize) -> PosixResult<Self> {
        let res = resize(&fd, len).and_then(|_| map(&fd, len));

        match res {
            Ok(addr) => Ok(Self {
                path,
                fd: spin::Mutex::new(Some(fd)),
                addr,
                len,
            }),
            Err(err) => {
                drop(fd);
                unlink(&path);
                Err(err)
            }
        }
    }

    /// Register as a reader of a published segment.
    /// Returns `None` if the segment was unlinked while waiting.
    fn join(path: &CStr, fd: OwnedFd, len: usize) -> PosixResult<Option<Self>> {
        lock_wait(&fd, READ_LOCK)?;

        let stat = fstat(&fd)?;
        if stat.st_nlink == 0 {
            trace!("segment {:?} vanished while waiting", path);
            return Ok(None);
        }

        if stat.st_size as u64 != len as u64 {
            warn!(
                "segment {:?} has size {} but {} was expected",
                path, stat.st_size, len
            );
            return Err(Error::InvalidHandle);
        }

        let addr = map(&fd, len)?;

        Ok(Some(Self {
            path: path.to_owned(),
            fd: spin::Mutex::new(Some(fd)),
            addr,
            len,
        }))
    }

    /// Downgrade the creator's exclusive lock so that other processes may attach
    pub fn publish(&self) -> PosixResult<()> {
        let fd = self.fd.lock();
        match fd.as_ref() {
            Some(fd) => lock_wait(fd, READ_LOCK),
            None => Err(Error::InvalidHandle),
        }
    }

    /// Drop a segment that failed to initialize: the name is removed
    pub fn abandon(self) {
        self.fd.lock().take();
        unlink(&self.path);
    }

    /// Stop being a reader of the segment.
    ///
    /// If no other process is attached, the name is unlinked and `true` is
    /// returned: the caller is the last user and should tear the contents down
    /// before dropping the mapping.
    pub fn detach(&self) -> bool {
        let Some(fd) = self.fd.lock().take() else {
            return false;
        };

        match try_lock(&fd, WRITE_LOCK) {
            Ok(true) => {
                unlink(&self.path);
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!("could not probe users of {:?}: {}", self.path, err);
                false
            }
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &CStr {
        &self.path
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.addr.as_ptr().cast(), self.len) };
        if ret == -1 {
            warn!("munmap of {:?} failed: {}", self.path, last_os_error());
        }
    }
}

fn open_fd(path: &CStr, flags: c_int) -> PosixResult<OwnedFd> {
    let mode = (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint;
    let fd = ret_to_result(unsafe { libc::shm_open(path.as_ptr(), flags, mode) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn unlink(path: &CStr) {
    if unsafe { libc::shm_unlink(path.as_ptr()) } == -1 {
        let err = last_os_error();
        if err != Error::NotFound {
            warn!("shm_unlink of {:?} failed: {}", path, err);
        }
    }
}

fn lock_request(kind: c_short) -> libc::flock {
    let mut request: libc::flock = unsafe { mem::zeroed() };
    request.l_type = kind;
    request.l_whence = libc::SEEK_SET as c_short;
    request.l_start = 0;
    request.l_len = 0;
    request
}

fn probe(fd: &OwnedFd) -> PosixResult<Probe> {
    let mut request = lock_request(WRITE_LOCK);
    ret_to_result(unsafe {
        libc::fcntl(
            fd.as_raw_fd(),
            libc::F_GETLK,
            &mut request as *mut libc::flock,
        )
    })?;

    Ok(match request.l_type {
        UNLOCKED => Probe::Unused,
        READ_LOCK => Probe::Readers,
        _ => Probe::Initializing,
    })
}

/// Returns `false` if a conflicting lock is held by another process
fn try_lock(fd: &OwnedFd, kind: c_short) -> PosixResult<bool> {
    let request = lock_request(kind);
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETLK, &request as *const libc::flock) } == -1 {
        return match errno() {
            libc::EAGAIN | libc::EACCES => Ok(false),
            _ => Err(last_os_error()),
        };
    }

    Ok(true)
}

fn lock_wait(fd: &OwnedFd, kind: c_short) -> PosixResult<()> {
    let request = lock_request(kind);
    loop {
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETLKW, &request as *const libc::flock) } != -1 {
            return Ok(());
        }

        if errno() != libc::EINTR {
            return Err(last_os_error());
        }
    }
}

fn fstat(fd: &OwnedFd) -> PosixResult<libc::stat> {
    let mut stat: libc::stat = unsafe { mem::zeroed() };
    ret_to_result(unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) })?;
    Ok(stat)
}

fn resize(fd: &OwnedFd, len: usize) -> PosixResult<()> {
    ret_to_result(unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) })?;
    Ok(())
}

fn map(fd: &OwnedFd, len: usize) -> PosixResult<NonNull<u8>> {
    let addr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(last_os_error());
    }

    NonNull::new(addr.cast()).ok_or(Error::GenFailure)
}
