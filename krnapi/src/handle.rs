use bitflags::bitflags;

/// Handle: opaque reference to a kernel object entry
///
/// Low 32 bits hold the slot index plus one, high 32 bits the slot generation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Handle(u64);

impl From<u64> for Handle {
    fn from(value: u64) -> Self {
        Handle(value)
    }
}

impl Handle {
    /// Pseudo handle designating the calling thread
    pub const CURRENT_THREAD: Handle = Handle(u64::MAX - 1);

    /// Construct a new invalid handle
    pub const fn invalid() -> Self {
        Handle(0)
    }

    /// Indicate is the handle is valid
    pub const fn valid(&self) -> bool {
        self.0 != 0
    }

    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Handle(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Slot index, if the value can designate a slot at all
    pub const fn index(&self) -> Option<u32> {
        let low = self.0 as u32;
        if low == 0 {
            None
        } else {
            Some(low - 1)
        }
    }

    pub const fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

bitflags! {
    /// Per-handle information flags
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct HandleFlags: u32 {
        /// Recorded only, handles are never inherited by child processes
        const INHERIT = 0x1;

        /// Closing the handle fails while set
        const PROTECT_FROM_CLOSE = 0x2;
    }
}
