use core::cell::Cell;

use krnapi::Error;
use log::debug;

pub type KrnResult<T> = Result<T, Error>;

thread_local! {
    static LAST_ERROR: Cell<Option<Error>> = const { Cell::new(None) };
}

/// Error recorded by the last failing call on this thread
///
/// Successful creations of named objects also set it: `Some(AlreadyExists)` if
/// the object already existed, `None` otherwise.
pub fn get_last_error() -> Option<Error> {
    LAST_ERROR.with(|last| last.get())
}

pub fn set_last_error(error: Option<Error>) {
    LAST_ERROR.with(|last| last.set(error));
}

pub(crate) trait ResultExt<T> {
    /// Record a failure as the thread's last error
    fn record(self, context: &str) -> KrnResult<T>;
}

impl<T> ResultExt<T> for KrnResult<T> {
    fn record(self, context: &str) -> KrnResult<T> {
        if let Err(err) = &self {
            debug!("{}: {}", context, err);
            set_last_error(Some(*err));
        }

        self
    }
}
