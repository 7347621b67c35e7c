//! Extract-once archive cache.
//!
//! [`ArchiveManager`] turns "a file inside an archive" into a real
//! directory on disk. Each archive is extracted at most once, with a bounded
//! number of extractions running at a time, and the outcome is recorded in
//! a `status.json` that other processes sharing the cache can read.
//!
//! ```no_run
//! use arkiv_cache::{ArchiveManager, ManagerConfig};
//! use arkiv_location::Location;
//!
//! # async fn demo() -> arkiv_cache::Result<()> {
//! let manager = ArchiveManager::new(ManagerConfig::default())?;
//! let inside = Location::from_url("file:///data/photos.zip//archive:2024/a.jpg")?;
//!
//! if let Some(job) = manager.extract(&inside).await? {
//!     job.on_entry_extracted(|entry| println!("{}", entry.name));
//!     job.wait().await;
//! }
//! let photo = manager.content_dir(&inside).join("2024/a.jpg");
//! # let _ = photo;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod job;
mod layout;
mod manager;
mod resolver;
mod status;

pub use config::{DEFAULT_MAX_EXTRACTORS, ManagerConfig, default_cache_root};
pub use error::{CacheError, Result};
pub use job::{ArchiveExtractor, JobHooks, JobState, NoHooks};
pub use layout::{CONTENTS_DIR, CacheLayout, STATUS_FILE};
pub use manager::{ArchiveManager, ManagerEvent};
pub use resolver::{CacheResolver, StdioResolver};
pub use status::ExtractorStatus;
