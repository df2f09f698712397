//! Error types shared by the indexer, the sources and the cache.
//!
//! Every variant is cheap to clone: results travel through shared futures,
//! so the same error value is handed to every waiter of a failed fetch.

use std::io;
use std::sync::Arc;

use crate::zip::CompressionMethod;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A magic number or structural field did not match the ZIP format.
    #[error("invalid archive: {0}")]
    Format(String),

    /// The content behind a source changed since the etag was issued.
    #[error("etag mismatch (expected {expected}, found {})", .actual.as_deref().unwrap_or("<none>"))]
    EtagMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("HTTP error: {0}")]
    Http(#[source] Arc<reqwest::Error>),

    #[error("HTTP request failed with status: {0}")]
    HttpStatus(u16),

    #[error("remote server does not support range requests")]
    RangeNotSupported,

    #[error("range {offset}+{length} is outside the source (size {size})")]
    OutOfBounds { offset: u64, length: u64, size: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("entry {path} uses unsupported compression method {method:?}")]
    UnsupportedCompression {
        path: String,
        method: CompressionMethod,
    },
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Returns `true` if the failure means the cached directory is stale.
    pub fn is_etag_mismatch(&self) -> bool {
        matches!(self, Self::EtagMismatch { .. })
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}
