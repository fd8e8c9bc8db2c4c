//! Windows-style waitable kernel objects (mutexes, semaphores, threads) over POSIX.
//!
//! Objects live behind opaque [`Handle`]s stored in a process-wide table.
//! Named mutexes and semaphores are backed by shared memory segments and can
//! be opened by name from other processes.
//!
//! Every failing call returns `Err` and also records the error in a per-thread
//! slot readable with [`get_last_error`].

mod api;
mod error;
pub mod kobject;
mod logging;
mod sync;

pub use api::*;
pub use error::{get_last_error, set_last_error, KrnResult};
pub use krnapi::*;
pub use logging::init;
