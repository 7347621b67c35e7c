//! Interchangeable extraction strategies.
//!
//! Every backend unpacks one archive into one output directory, reports
//! each entry as it lands on disk and finishes with an [`ExtractorResult`].
//! Entry names are passed through [`sanitize_entry`](crate::sanitize_entry)
//! before they are reported; unsafe names are logged and dropped.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::format::{ArchiveFormat, detect_from_reader};
use crate::result::{ExtractedEntry, ExtractorResult};

#[cfg(any(feature = "zip", feature = "tar"))]
mod library;
mod process;
mod rar;
mod sevenz;

#[cfg(any(feature = "zip", feature = "tar"))]
pub use library::LibraryExtractor;
pub use rar::{DEFAULT_RAR_KEYWORDS, RarExtractor, parse_rar_line, rar_entry_pattern};
pub use sevenz::{SevenZipExtractor, parse_7z_line};

/// One extraction run.
///
/// `extract` is the worker body: it blocks until the archive is unpacked,
/// fails, or is interrupted, and turns every internal error into a failure
/// result. `interrupt` may be called from any thread, any number of times,
/// before or during `extract`.
pub trait Extractor: Send + Sync {
    fn extract(&self, on_entry: &mut dyn FnMut(ExtractedEntry)) -> ExtractorResult;

    fn interrupt(&self);

    fn kind(&self) -> BackendKind;
}

/// Builds a backend for an archive/output directory pair.
pub trait ExtractorFactory: Send + Sync {
    fn create(&self, archive: &Path, outdir: &Path) -> Result<Box<dyn Extractor>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Rar,
    #[serde(rename = "7z")]
    SevenZip,
    Library,
}

impl BackendKind {
    pub fn for_format(format: ArchiveFormat) -> Self {
        match format {
            ArchiveFormat::Rar => Self::Rar,
            ArchiveFormat::SevenZip => Self::SevenZip,
            other if other.is_library_supported() => Self::Library,
            _ => Self::SevenZip,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rar => "rar",
            Self::SevenZip => "7z",
            Self::Library => "library",
        })
    }
}

/// Extension-driven backend selection.
///
/// `force` overrides the table for every archive.
#[derive(Clone, Debug)]
pub struct BackendTable {
    pub rar_program: PathBuf,
    pub sevenzip_program: PathBuf,
    pub rar_keywords: Vec<String>,
    pub force: Option<BackendKind>,
}

impl Default for BackendTable {
    fn default() -> Self {
        Self {
            rar_program: PathBuf::from("unrar"),
            sevenzip_program: PathBuf::from("7z"),
            rar_keywords: DEFAULT_RAR_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            force: None,
        }
    }
}

impl BackendTable {
    pub fn select(&self, archive: &Path) -> BackendKind {
        if let Some(kind) = self.force {
            return kind;
        }
        if let Some(format) = ArchiveFormat::from_path(archive) {
            return BackendKind::for_format(format);
        }
        // Unknown suffix: sniff the header, and let 7z try anything else.
        let sniffed = File::open(archive)
            .and_then(|mut file| detect_from_reader(&mut file))
            .ok()
            .flatten();
        sniffed.map_or(BackendKind::SevenZip, BackendKind::for_format)
    }

    pub fn build(
        &self,
        kind: BackendKind,
        archive: &Path,
        outdir: &Path,
    ) -> Result<Box<dyn Extractor>> {
        debug!(archive = %archive.display(), backend = %kind, "building extractor");
        match kind {
            BackendKind::Rar => Ok(Box::new(RarExtractor::new(
                &self.rar_program,
                archive,
                outdir,
                &self.rar_keywords,
            )?)),
            BackendKind::SevenZip => Ok(Box::new(SevenZipExtractor::new(
                &self.sevenzip_program,
                archive,
                outdir,
            ))),
            #[cfg(any(feature = "zip", feature = "tar"))]
            BackendKind::Library => Ok(Box::new(LibraryExtractor::new(archive, outdir))),
            #[cfg(not(any(feature = "zip", feature = "tar")))]
            BackendKind::Library => Err(crate::ArchiveError::UnsupportedFormat(
                archive.to_path_buf(),
            )),
        }
    }
}

impl ExtractorFactory for BackendTable {
    fn create(&self, archive: &Path, outdir: &Path) -> Result<Box<dyn Extractor>> {
        self.build(self.select(archive), archive, outdir)
    }
}
