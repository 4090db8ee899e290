//! Error types for shelf-sync.

use std::path::PathBuf;

use thiserror::Error;

use shelf_core::StoreError;

/// All errors that can arise from a sync operation.
///
/// Every variant is fatal to the single operation that raised it, never to
/// the process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A fetch failed (connection, HTTP status, body read).
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The downloaded bytes are not a readable zip archive.
    #[error("invalid archive from {url}: {source}")]
    ArchiveFormat {
        url: String,
        #[source]
        source: zip::result::ZipError,
    },

    /// An archive entry would escape the target directory.
    #[error("archive entry {name:?} escapes the target folder")]
    UnsafeEntry { name: String },

    /// A fetched document does not have the expected shape.
    #[error("invalid document from {url}: {message}")]
    Validation { url: String, message: String },

    /// A filesystem operation failed, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An internal invariant would be violated by continuing.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Loading or checkpointing the catalog failed.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking worker task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Join(err.to_string())
    }
}
