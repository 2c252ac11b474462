use std::path::PathBuf;

use thiserror::Error;

/// Top-level failure of one ingestion cycle (or of startup, for `Config`).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("malformed odds payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Only a bad configuration stops the process; everything else waits for the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Config(_))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("odds API error (status {status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode odds response: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("sample payload unavailable at {}: {source}", .path.display())]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} has no `{column}` column", .path.display())]
    MissingColumn { path: PathBuf, column: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        StorageError::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
