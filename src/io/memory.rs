use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::{RangeResponse, RangeSource, check_bounds, check_etag};
use crate::error::{Error, Result};

struct Content {
    data: Bytes,
    version: u64,
}

impl Content {
    fn etag(&self) -> String {
        format!("\"v{}\"", self.version)
    }
}

/// In-memory source.
///
/// The etag is a version counter bumped by [`replace`](Self::replace), which
/// makes it handy for exercising invalidation without touching the disk or
/// the network. Clones and slices share the same content and read counter.
#[derive(Clone)]
pub struct MemorySource {
    key: String,
    content: Arc<RwLock<Content>>,
    base_offset: u64,
    latency: Option<Duration>,
    reads: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            content: Arc::new(RwLock::new(Content {
                data: data.into(),
                version: 1,
            })),
            base_offset: 0,
            latency: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every read by `latency` so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Swap the content, changing the etag.
    pub fn replace(&self, data: impl Into<Bytes>) {
        let mut content = self.content.write();
        content.data = data.into();
        content.version += 1;
    }

    pub fn etag(&self) -> String {
        self.content.read().etag()
    }

    /// Number of `read_range` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeSource for MemorySource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn size(&self) -> Result<u64> {
        let len = self.content.read().data.len() as u64;
        Ok(len.saturating_sub(self.base_offset))
    }

    async fn read_range(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
        etag: Option<&str>,
    ) -> Result<RangeResponse> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            match cancel {
                Some(token) => tokio::select! {
                    _ = tokio::time::sleep(latency) => {}
                    _ = token.cancelled() => return Err(Error::Cancelled),
                },
                None => tokio::time::sleep(latency).await,
            }
        } else if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let content = self.content.read();
        let current = content.etag();
        check_etag(etag, Some(&current))?;

        let size = (content.data.len() as u64).saturating_sub(self.base_offset);
        check_bounds(offset, length, size)?;

        let start = (self.base_offset + offset) as usize;
        let data = content.data.slice(start..start + length as usize);
        Ok(RangeResponse::new(data, Some(current)))
    }

    fn slice_at(&self, base_offset: u64) -> Arc<dyn RangeSource> {
        let mut slice = self.clone();
        slice.base_offset = self.base_offset + base_offset;
        slice.key = format!("{}@{}", self.key, slice.base_offset);
        Arc::new(slice)
    }
}
