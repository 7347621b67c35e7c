use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const INTERRUPTED_MESSAGE: &str = "interrupted";

/// Outcome code. The integer values are part of the on-disk status format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ExtractorResultStatus {
    Success = 0,
    Failure = 1,
    Working = 2,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown extractor status code {0}")]
pub struct UnknownStatus(pub u8);

impl From<ExtractorResultStatus> for u8 {
    fn from(status: ExtractorResultStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for ExtractorResultStatus {
    type Error = UnknownStatus;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Success),
            1 => Ok(Self::Failure),
            2 => Ok(Self::Working),
            other => Err(UnknownStatus(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractorResult {
    pub status: ExtractorResultStatus,
    pub message: String,
}

impl ExtractorResult {
    pub fn success() -> Self {
        Self::success_with(String::new())
    }

    /// Success carrying diagnostics, e.g. warnings a tool printed to stderr.
    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            status: ExtractorResultStatus::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ExtractorResultStatus::Failure,
            message: message.into(),
        }
    }

    pub fn interrupted() -> Self {
        Self::failure(INTERRUPTED_MESSAGE)
    }

    pub fn working() -> Self {
        Self {
            status: ExtractorResultStatus::Working,
            message: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractorResultStatus::Success
    }

    pub fn is_interrupted(&self) -> bool {
        self.status == ExtractorResultStatus::Failure && self.message == INTERRUPTED_MESSAGE
    }
}

/// One archive member written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedEntry {
    /// Name as stored in the archive.
    pub name: String,
    /// Absolute destination path below the output directory.
    pub path: PathBuf,
}
