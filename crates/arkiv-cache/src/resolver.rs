use std::path::PathBuf;

use arkiv_location::{ARCHIVE_PROTOCOL, FILE_PROTOCOL, Location};

use crate::error::{CacheError, Result};
use crate::layout::CacheLayout;

/// Maps a location inside an overlay to the real file that holds the
/// overlay's bytes.
pub trait StdioResolver: Send + Sync {
    fn resolve(&self, location: &Location) -> Result<PathBuf>;
}

/// Resolves plain files directly and archives nested in archives through
/// the extraction cache. The outer archive must already be extracted.
#[derive(Clone, Debug)]
pub struct CacheResolver {
    layout: CacheLayout,
}

impl CacheResolver {
    pub fn new(layout: CacheLayout) -> Self {
        Self { layout }
    }
}

impl StdioResolver for CacheResolver {
    fn resolve(&self, location: &Location) -> Result<PathBuf> {
        let origin = location
            .origin()
            .ok_or_else(|| CacheError::NotInArchive(location.as_url()))?;
        if origin.has_stdio_name() {
            return Ok(origin.get_stdio_name()?);
        }

        let unsupported = |protocol: &str| CacheError::UnsupportedProtocol {
            protocol: protocol.to_string(),
            location: location.as_url(),
        };
        if origin.protocol() != FILE_PROTOCOL {
            return Err(unsupported(origin.protocol()));
        }
        match origin.innermost() {
            Some(payload) if payload.protocol() != ARCHIVE_PROTOCOL => {
                Err(unsupported(payload.protocol()))
            }
            Some(payload) if !payload.is_root() => {
                Ok(self.layout.content_dir(&origin).join(payload.path()))
            }
            _ => Err(CacheError::NotInArchive(origin.as_url())),
        }
    }
}
