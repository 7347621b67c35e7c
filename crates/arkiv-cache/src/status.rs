use std::path::{Path, PathBuf};

use arkiv_archive::{ExtractorResult, ExtractorResultStatus};
use arkiv_fs::{AtomicWriteOptions, atomic_read, atomic_write};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, Result};

// Well above the rounding a float mtime picks up through JSON, well below
// any real modification.
const MTIME_TOLERANCE: f64 = 1e-6;

/// Contents of `status.json`, shared with other processes using the cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractorStatus {
    /// Absolute path of the extracted archive.
    pub path: PathBuf,
    /// Archive mtime, in seconds since the epoch, when the job was created.
    pub mtime: f64,
    pub status: ExtractorResultStatus,
    pub message: String,
    /// Archive-internal names of the extracted entries.
    pub entries: Vec<String>,
}

impl ExtractorStatus {
    pub fn working(path: &Path, mtime: f64) -> Self {
        Self {
            path: path.to_path_buf(),
            mtime,
            status: ExtractorResultStatus::Working,
            message: String::new(),
            entries: Vec::new(),
        }
    }

    pub fn finished(path: &Path, mtime: f64, result: &ExtractorResult, entries: Vec<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            mtime,
            status: result.status,
            message: result.message.clone(),
            entries,
        }
    }

    /// Whether `mtime` differs from the recorded one.
    pub fn mtime_changed(&self, mtime: f64) -> bool {
        (self.mtime - mtime).abs() > MTIME_TOLERANCE
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = atomic_read(path).map_err(|e| CacheError::CacheCorrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::CacheCorrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Like [`ExtractorStatus::read`], but an unreadable file counts as a
    /// failed extraction.
    pub fn read_or_failure(path: &Path) -> Self {
        match Self::read(path) {
            Ok(status) => status,
            Err(err) => {
                warn!(path = %path.display(), %err, "treating unreadable status as failure");
                Self {
                    path: PathBuf::new(),
                    mtime: 0.0,
                    status: ExtractorResultStatus::Failure,
                    message: err.to_string(),
                    entries: Vec::new(),
                }
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_vec(self).map_err(|e| CacheError::CacheCorrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        json.push(b'\n');
        atomic_write(path, &json, AtomicWriteOptions::new().sync(true))?;
        Ok(())
    }
}
