//! 采集器错误类型

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Debug, Error)]
pub enum CollectorError {
    /// The log store could not be opened or scoped (missing tool, no privilege).
    #[error("log source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single query against the log store failed.
    #[error("log query failed: {0}")]
    QueryFailed(String),

    /// Reading or writing a collector-owned file failed.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A poll cycle was started while another one still holds the cursor.
    #[error("a poll cycle is already in progress")]
    CycleInProgress,
}

impl CollectorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
