use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("invalid location '{input}': {reason}")]
    Parse { input: String, reason: &'static str },

    #[error("invalid protocol '{0}'")]
    InvalidProtocol(String),

    #[error("location '{0}' has no filesystem path")]
    NoStdioName(String),

    #[error("failed to resolve '{path}': {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LocationError {
    pub(crate) fn parse(input: &str, reason: &'static str) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, LocationError>;
