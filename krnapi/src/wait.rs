/// Timeout value meaning "wait forever"
pub const INFINITE: u32 = 0xFFFF_FFFF;

pub const WAIT_OBJECT_0: u32 = 0;
pub const WAIT_TIMEOUT: u32 = 258;
pub const WAIT_FAILED: u32 = 0xFFFF_FFFF;

/// Wait timeout
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Timeout {
    Infinite,
    Millis(u32),
}

impl From<u32> for Timeout {
    fn from(milliseconds: u32) -> Self {
        if milliseconds == INFINITE {
            Timeout::Infinite
        } else {
            Timeout::Millis(milliseconds)
        }
    }
}

/// Outcome of a successful wait
///
/// Failures are reported through `Err(Error)` instead of a third variant.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

impl WaitStatus {
    pub const fn code(self) -> u32 {
        match self {
            WaitStatus::Signaled => WAIT_OBJECT_0,
            WaitStatus::TimedOut => WAIT_TIMEOUT,
        }
    }
}
