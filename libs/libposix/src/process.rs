use core::mem;

use crate::{ret_to_result, thread::CpuTimes, time::timeval_to_filetime, PosixResult};

pub fn current_process_id() -> u32 {
    unsafe { libc::getpid() as u32 }
}

/// CPU times of the whole calling process
pub fn cpu_times() -> PosixResult<CpuTimes> {
    let mut usage: libc::rusage = unsafe { mem::zeroed() };
    ret_to_result(unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) })?;

    Ok(CpuTimes {
        kernel: timeval_to_filetime(&usage.ru_stime),
        user: timeval_to_filetime(&usage.ru_utime),
    })
}
