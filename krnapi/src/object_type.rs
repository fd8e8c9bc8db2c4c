/// Kernel object type
#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ObjectType {
    Invalid = 0,
    Thread = 4,
    Semaphore = 6,
    Mutex = 8,
}

impl ObjectType {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            4 => Self::Thread,
            6 => Self::Semaphore,
            8 => Self::Mutex,
            _ => Self::Invalid,
        }
    }

    pub const fn into_raw(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Thread => "thread",
            Self::Semaphore => "semaphore",
            Self::Mutex => "mutex",
        }
    }
}
