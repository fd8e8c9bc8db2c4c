use core::fmt;

/// List of errors
///
/// Discriminants are the Windows error codes, so `code()` can be handed back
/// to callers expecting `GetLastError()` values.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u32)]
pub enum Error {
    NotFound = 2,
    AccessDenied = 5,
    InvalidHandle = 6,
    OutOfMemory = 8,
    GenFailure = 31,
    NotSupported = 50,
    InvalidParameter = 87,
    NotImplemented = 120,
    InsufficientBuffer = 122,
    InvalidName = 123,
    BadArguments = 160,
    Busy = 170,
    AlreadyExists = 183,
    NotOwner = 288,
    PossibleDeadlock = 1131,
    SystemResource = 1450,
    Timeout = 1460,
}

impl Error {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            2 => Some(Self::NotFound),
            5 => Some(Self::AccessDenied),
            6 => Some(Self::InvalidHandle),
            8 => Some(Self::OutOfMemory),
            31 => Some(Self::GenFailure),
            50 => Some(Self::NotSupported),
            87 => Some(Self::InvalidParameter),
            120 => Some(Self::NotImplemented),
            122 => Some(Self::InsufficientBuffer),
            123 => Some(Self::InvalidName),
            160 => Some(Self::BadArguments),
            170 => Some(Self::Busy),
            183 => Some(Self::AlreadyExists),
            288 => Some(Self::NotOwner),
            1131 => Some(Self::PossibleDeadlock),
            1450 => Some(Self::SystemResource),
            1460 => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::NotFound => "object not found",
            Error::AccessDenied => "access denied",
            Error::InvalidHandle => "invalid handle",
            Error::OutOfMemory => "not enough memory",
            Error::GenFailure => "general failure",
            Error::NotSupported => "request not supported",
            Error::InvalidParameter => "invalid parameter",
            Error::NotImplemented => "call not implemented",
            Error::InsufficientBuffer => "insufficient buffer",
            Error::InvalidName => "invalid name",
            Error::BadArguments => "bad arguments",
            Error::Busy => "resource busy",
            Error::AlreadyExists => "object already exists",
            Error::NotOwner => "not owner",
            Error::PossibleDeadlock => "possible deadlock",
            Error::SystemResource => "insufficient system resources",
            Error::Timeout => "timeout",
        };

        write!(f, "{} (code {})", text, self.code())
    }
}

impl core::error::Error for Error {}
