use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unsupported archive format: '{0}'")]
    UnsupportedFormat(PathBuf),

    #[error("unsafe entry '{entry}': {reason}")]
    UnsafeEntry { entry: String, reason: &'static str },

    #[error("symlink target escapes output directory: '{target}' in '{link}'")]
    SymlinkEscape { target: PathBuf, link: PathBuf },

    #[error("archive is corrupted: {0}")]
    Corrupted(String),

    #[error("failed to open '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    #[error("failed to start '{program}': {source}")]
    Spawn { program: PathBuf, source: io::Error },

    #[error("invalid entry pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
