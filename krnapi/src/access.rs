use bitflags::bitflags;

bitflags! {
    /// Access rights granted to a handle
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
    pub struct Access: u32 {
        /// Modify the mutex state (release it)
        const MUTEX_MODIFY_STATE = 0x0001;

        /// Modify the semaphore state (release it)
        const SEMAPHORE_MODIFY_STATE = 0x0002;

        const THREAD_TERMINATE = 0x0001;
        const THREAD_SUSPEND_RESUME = 0x0002;
        const THREAD_SET_INFORMATION = 0x0020;
        const THREAD_QUERY_INFORMATION = 0x0040;

        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;

        /// Wait on the object
        const SYNCHRONIZE = 0x0010_0000;

        const STANDARD_RIGHTS_REQUIRED = 0x000F_0000;

        const MUTEX_ALL_ACCESS = 0x001F_0001;
        const SEMAPHORE_ALL_ACCESS = 0x001F_0003;
        const THREAD_ALL_ACCESS = 0x001F_FFFF;
    }
}

bitflags! {
    /// Mutex creation flags
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct MutexFlags: u32 {
        /// The creator owns the mutex once created
        const INITIAL_OWNER = 0x0000_0001;
    }
}

bitflags! {
    /// Semaphore creation flags (reserved)
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct SemaphoreFlags: u32 {}
}
