//! Archive extraction backends.
//!
//! Three strategies unpack an archive into a directory: the external `unrar`
//! and `7z` tools, and an in-process reader built on the `zip` and `tar`
//! crates. All of them share one contract, [`Extractor`], and the same
//! entry-name sanitization, so a hostile archive can never write outside
//! its output directory.
//!
//! ```no_run
//! use std::path::Path;
//! use arkiv_archive::{BackendTable, ExtractorFactory};
//!
//! let table = BackendTable::default();
//! let extractor = table.create(Path::new("/tmp/photos.zip"), Path::new("/tmp/out"))?;
//! let result = extractor.extract(&mut |entry| println!("{}", entry.name));
//! assert!(result.is_success());
//! # Ok::<(), arkiv_archive::ArchiveError>(())
//! ```

pub mod backend;
pub mod error;
pub mod format;
pub mod result;
pub mod sanitize;

pub use backend::{
    BackendKind, BackendTable, DEFAULT_RAR_KEYWORDS, Extractor, ExtractorFactory, RarExtractor,
    SevenZipExtractor, parse_7z_line, parse_rar_line, rar_entry_pattern,
};
#[cfg(any(feature = "zip", feature = "tar"))]
pub use backend::LibraryExtractor;
pub use error::{ArchiveError, Result};
pub use format::{ArchiveFormat, TarCompress, detect_format, detect_from_reader};
pub use result::{
    ExtractedEntry, ExtractorResult, ExtractorResultStatus, INTERRUPTED_MESSAGE, UnknownStatus,
};
pub use sanitize::{SanitizedPath, reject_linked_path, sanitize_entry, sanitize_symlink_target};
