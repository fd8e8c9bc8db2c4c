use core::ffi::c_int;

use krnapi::Error;

/// Map an `errno` value onto the error taxonomy
pub fn translate_errno(errno: c_int) -> Error {
    match errno {
        libc::ENOENT => Error::NotFound,
        libc::EACCES | libc::EPERM => Error::AccessDenied,
        libc::EBADF | libc::ESRCH => Error::InvalidHandle,
        libc::ENOMEM => Error::OutOfMemory,
        libc::EINVAL => Error::InvalidParameter,
        libc::ENAMETOOLONG => Error::InvalidName,
        libc::EEXIST => Error::AlreadyExists,
        libc::EBUSY => Error::Busy,
        libc::EDEADLK => Error::PossibleDeadlock,
        libc::ETIMEDOUT => Error::Timeout,
        libc::ENOSYS => Error::NotImplemented,
        libc::EAGAIN | libc::EMFILE | libc::ENFILE | libc::ENOSPC => Error::SystemResource,
        err if err == libc::ENOTSUP || err == libc::EOPNOTSUPP => Error::NotSupported,
        _ => Error::GenFailure,
    }
}

/// Current value of `errno`
pub fn errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

pub fn last_os_error() -> Error {
    translate_errno(errno())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_errnos() {
        assert_eq!(translate_errno(libc::ENOENT), Error::NotFound);
        assert_eq!(translate_errno(libc::EEXIST), Error::AlreadyExists);
        assert_eq!(translate_errno(libc::ETIMEDOUT), Error::Timeout);
        assert_eq!(translate_errno(libc::EMFILE), Error::SystemResource);
        assert_eq!(translate_errno(libc::ENOTSUP), Error::NotSupported);
        assert_eq!(translate_errno(-1), Error::GenFailure);
    }
}
