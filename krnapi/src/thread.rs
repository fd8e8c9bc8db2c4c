use bitflags::bitflags;

use crate::FileTime;

/// Exit code reported while a thread is still running
pub const STILL_ACTIVE: u32 = 259;

/// Thread priority
#[repr(i32)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum ThreadPriority {
    Idle = -15,
    Lowest = -2,
    BelowNormal = -1,
    #[default]
    Normal = 0,
    AboveNormal = 1,
    Highest = 2,
    TimeCritical = 15,
}

impl ThreadPriority {
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -15 => Some(Self::Idle),
            -2 => Some(Self::Lowest),
            -1 => Some(Self::BelowNormal),
            0 => Some(Self::Normal),
            1 => Some(Self::AboveNormal),
            2 => Some(Self::Highest),
            15 => Some(Self::TimeCritical),
            _ => None,
        }
    }

    pub const fn into_raw(self) -> i32 {
        self as i32
    }
}

bitflags! {
    /// Thread creation flags
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct ThreadCreationFlags: u32 {
        /// The thread body does not run until the thread is resumed
        const CREATE_SUSPENDED = 0x0000_0004;

        /// Accepted for compatibility, the stack size is always a commit size
        const STACK_SIZE_PARAM_IS_A_RESERVATION = 0x0001_0000;
    }
}

/// Thread time accounting
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct ThreadTimes {
    pub creation: FileTime,
    /// Zero while the thread is running
    pub exit: FileTime,
    pub kernel: FileTime,
    pub user: FileTime,
}

/// Process time accounting
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct ProcessTimes {
    pub kernel: FileTime,
    pub user: FileTime,
}
