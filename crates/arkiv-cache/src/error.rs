use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unsupported protocol '{protocol}' in '{location}'")]
    UnsupportedProtocol { protocol: String, location: String },

    #[error("'{0}' does not point into an archive")]
    NotInArchive(String),

    #[error("archive '{0}' does not exist")]
    ArchiveMissing(PathBuf),

    #[error("corrupted status file '{path}': {reason}")]
    CacheCorrupted { path: PathBuf, reason: String },

    #[error("failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read configuration '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("archive manager has shut down")]
    ControllerStopped,

    #[error(transparent)]
    Location(#[from] arkiv_location::LocationError),

    #[error(transparent)]
    Fs(#[from] arkiv_fs::Error),

    #[error(transparent)]
    Archive(#[from] arkiv_archive::ArchiveError),
}

pub type Result<T> = std::result::Result<T, CacheError>;
