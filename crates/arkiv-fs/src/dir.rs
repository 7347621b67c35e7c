use crate::{Error, Result};
use std::path::Path;

/// Create `path` and any missing parents.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| Error::CreateDir {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Seconds since the epoch of `path`'s modification time, `0.0` if unknown.
pub fn mtime_secs(path: impl AsRef<Path>) -> f64 {
    std::fs::metadata(path.as_ref())
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
