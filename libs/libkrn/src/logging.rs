/// Install the process logger, filtered by `RUST_LOG` (default: `info`).
///
/// Calling it again, or after another logger was installed, does nothing.
#[cfg(feature = "logging")]
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Install the process logger. Built without the `logging` feature, log
/// records go to whatever logger the application installs.
#[cfg(not(feature = "logging"))]
pub fn init() {}
