use std::path::{Path, PathBuf};

use arkiv_location::Location;
use sha2::{Digest, Sha256};

pub const CONTENTS_DIR: &str = "contents";
pub const STATUS_FILE: &str = "status.json";

/// Where an archive's extraction lives on disk.
///
/// ```text
/// <root>/<sha256 of archive root url>/status.json
/// <root>/<sha256 of archive root url>/contents/...
/// ```
#[derive(Clone, Debug)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every location inside one archive maps to the same key. A location
    /// without payloads is keyed as itself.
    pub fn key(&self, location: &Location) -> String {
        let root = location.archive_root().unwrap_or_else(|| location.clone());
        hex::encode(Sha256::digest(root.as_url().as_bytes()))
    }

    pub fn output_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn status_path(&self, key: &str) -> PathBuf {
        self.output_dir(key).join(STATUS_FILE)
    }

    pub fn contents_dir(&self, key: &str) -> PathBuf {
        self.output_dir(key).join(CONTENTS_DIR)
    }

    pub fn content_dir(&self, location: &Location) -> PathBuf {
        self.contents_dir(&self.key(location))
    }
}
