pub mod acl;
pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

pub use acl::*;
pub use backend::*;
pub use error::*;
pub use file::*;
pub use memory::{MemoryBackend, MemoryFile};
