//! Filesystem primitives shared by the arkiv crates.
//!
//! Status files in the extraction cache are read by other processes while
//! their owner may be rewriting them, so every write goes through
//! [`atomic_write`].

mod atomic;
mod dir;
mod error;

pub use atomic::{AtomicWriteOptions, atomic_read, atomic_write};
pub use dir::{ensure_dir, mtime_secs};
pub use error::{Error, Result};
