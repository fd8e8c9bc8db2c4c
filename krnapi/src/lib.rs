#![no_std]

mod access;
mod error;
mod handle;
mod object_type;
mod thread;
mod time;
mod wait;

pub use access::*;
pub use error::*;
pub use handle::*;
pub use object_type::*;
pub use thread::*;
pub use time::*;
pub use wait::*;

/// Maximum length of a shared object path component, including the leading slash
pub const NAME_MAX: usize = 255;
