use std::path::PathBuf;

use thiserror::Error;

/// Failures of the durable stores (cache storage, submission records, host state).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt entry {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid cache name: {0}")]
    InvalidCacheName(String),

    #[error("Cannot cache a {0} request")]
    Uncacheable(String),

    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    #[error("Record already exists: {0}")]
    DuplicateKey(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of a single network fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network unreachable for {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Server rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    pub fn unreachable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Unreachable {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by worker event handlers.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Install failed while precaching {path}: {source}")]
    InstallFailed {
        path: String,
        #[source]
        source: FetchError,
    },

    #[error("Precache of {path} returned status {status}")]
    PrecacheStatus { path: String, status: u16 },

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkerError {
    /// True for failures that abort an install and keep the previous version.
    pub fn is_install_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::InstallFailed { .. } | WorkerError::PrecacheStatus { .. }
        )
    }
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
