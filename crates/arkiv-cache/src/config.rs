use std::path::{Path, PathBuf};

use arkiv_archive::{BackendKind, BackendTable, DEFAULT_RAR_KEYWORDS};
use serde::Deserialize;

use crate::error::{CacheError, Result};

pub const DEFAULT_MAX_EXTRACTORS: usize = 2;

/// Settings injected into [`ArchiveManager`](crate::ArchiveManager).
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration:
///
/// ```toml
/// cache_root = "/var/cache/arkiv"
/// max_extractors = 4
/// backend = "7z"
/// rar_keywords = ["Extracting", "Creating", "Extrayendo"]
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    pub cache_root: PathBuf,
    pub max_extractors: usize,
    pub rar_program: PathBuf,
    pub sevenzip_program: PathBuf,
    /// Use this backend for every archive instead of choosing by extension.
    pub backend: Option<BackendKind>,
    pub rar_keywords: Vec<String>,
    /// Re-extract when the archive's mtime differs from the recorded one.
    pub invalidate_on_mtime: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let table = BackendTable::default();
        Self {
            cache_root: default_cache_root(),
            max_extractors: DEFAULT_MAX_EXTRACTORS,
            rar_program: table.rar_program,
            sevenzip_program: table.sevenzip_program,
            backend: None,
            rar_keywords: DEFAULT_RAR_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            invalidate_on_mtime: false,
        }
    }
}

/// `~/.cache/arkiv/archives`, or below the temp dir when there is no home.
pub fn default_cache_root() -> PathBuf {
    home::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join("arkiv")
        .join("archives")
}

impl ManagerConfig {
    /// A default configuration rooted at `cache_root`.
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CacheError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_extractors == 0 {
            return Err(CacheError::Config("max_extractors must be at least 1".into()));
        }
        if self.rar_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(CacheError::Config("rar_keywords must not be empty".into()));
        }
        Ok(())
    }

    pub fn backend_table(&self) -> BackendTable {
        BackendTable {
            rar_program: self.rar_program.clone(),
            sevenzip_program: self.sevenzip_program.clone(),
            rar_keywords: self.rar_keywords.clone(),
            force: self.backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config.max_extractors, DEFAULT_MAX_EXTRACTORS);
        assert_eq!(config.rar_keywords, ["Extracting", "Creating"]);
        assert!(config.backend.is_none());
        assert!(!config.invalidate_on_mtime);
        assert!(config.cache_root.ends_with(".cache/arkiv/archives"));
    }

    #[test]
    fn overrides() {
        let config = ManagerConfig::from_toml_str(
            r#"
            cache_root = "/var/cache/arkiv"
            max_extractors = 4
            backend = "7z"
            sevenzip_program = "/opt/7zz"
            invalidate_on_mtime = true
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/var/cache/arkiv"));
        assert_eq!(config.max_extractors, 4);

        let table = config.backend_table();
        assert_eq!(table.force, Some(BackendKind::SevenZip));
        assert_eq!(table.sevenzip_program, PathBuf::from("/opt/7zz"));
        assert_eq!(table.select(Path::new("a.rar")), BackendKind::SevenZip);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ManagerConfig::from_toml_str("max_extractors = 0").is_err());
        assert!(ManagerConfig::from_toml_str("rar_keywords = []").is_err());
        assert!(ManagerConfig::from_toml_str("backend = \"zpaq\"").is_err());
        assert!(ManagerConfig::from_toml_str("max_extractorz = 3").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arkiv.toml");
        std::fs::write(&path, "max_extractors = 1\n").unwrap();
        assert_eq!(ManagerConfig::load(&path).unwrap().max_extractors, 1);
        assert!(matches!(
            ManagerConfig::load(dir.path().join("missing.toml")),
            Err(CacheError::ConfigRead { .. })
        ));
    }
}
