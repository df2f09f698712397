//! Byte-range sources.
//!
//! Everything above this module reads archives through [`RangeSource`], so
//! the indexer and the cache never care whether bytes come from disk, an
//! HTTP server or memory.

mod http;
mod local;
mod memory;

pub use http::{HttpConfig, HttpSource};
pub use local::LocalSource;
pub use memory::MemorySource;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Bytes returned by a single range read.
#[derive(Debug, Clone, Default)]
pub struct RangeResponse {
    pub data: Bytes,
    /// Content identity observed while serving this read.
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

impl RangeResponse {
    pub fn new(data: Bytes, etag: Option<String>) -> Self {
        Self {
            data,
            etag,
            ..Default::default()
        }
    }
}

/// Random access to an archive's bytes.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Stable identity used to key cached state for this source.
    fn key(&self) -> &str;

    /// Total length of the source in bytes.
    async fn size(&self) -> Result<u64>;

    /// Read `length` bytes at `offset`.
    ///
    /// When `etag` is given and the content no longer matches it, the read
    /// fails with [`Error::EtagMismatch`] instead of returning fresh bytes.
    async fn read_range(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
        etag: Option<&str>,
    ) -> Result<RangeResponse>;

    /// A view of this source starting at `base_offset`, used to hand a
    /// nested sub-archive to another reader.
    fn slice_at(&self, base_offset: u64) -> Arc<dyn RangeSource>;
}

/// Rejects reads that reach past the end of a source of `size` bytes.
pub(crate) fn check_bounds(offset: u64, length: u64, size: u64) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::OutOfBounds {
            offset,
            length,
            size,
        }),
    }
}

/// Compares the etag a caller expects with the one currently observed.
pub(crate) fn check_etag(expected: Option<&str>, actual: Option<&str>) -> Result<()> {
    match expected {
        Some(expected) if actual != Some(expected) => {
            tracing::warn!(expected, actual, "Content changed under a tagged read");
            Err(Error::EtagMismatch {
                expected: expected.to_string(),
                actual: actual.map(str::to_string),
            })
        }
        _ => Ok(()),
    }
}
