use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use reqwest::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, ETAG, EXPIRES, HeaderMap, IF_MATCH,
    RANGE,
};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use super::{RangeResponse, RangeSource, check_bounds, check_etag};
use crate::error::{Error, Result};

/// Connection settings for [`HttpSource`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    /// Attempts allowed for timeouts and connection errors per read.
    pub max_retry: u32,
    /// Honour `HTTP_PROXY`-style environment variables.
    pub use_system_proxy: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retry: 10,
            use_system_proxy: true,
        }
    }
}

/// What the server last told us about the resource.
#[derive(Debug, Clone)]
struct Remote {
    size: u64,
    etag: Option<String>,
    /// Set when a tagged read found the content changed; the next
    /// [`RangeSource::size`] call issues a fresh HEAD request.
    stale: bool,
}

/// HTTP source reading through `Range` requests.
///
/// Tagged reads send `If-Match`; a `412 Precondition Failed` or a response
/// carrying a different `ETag` is reported as [`Error::EtagMismatch`].
/// The resource length is kept current from `Content-Range` totals and
/// refreshed after a mismatch, so a re-index after the bundle was replaced
/// reads the new tail.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
    key: String,
    remote: Arc<RwLock<Remote>>,
    base_offset: u64,
    transferred_bytes: Arc<AtomicU64>,
    max_retry: u32,
}

impl HttpSource {
    /// Send a HEAD request to `url` for range support, size and etag.
    pub async fn new(url: String) -> Result<Self> {
        Self::with_config(url, HttpConfig::default()).await
    }

    pub async fn with_config(url: String, config: HttpConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        let remote = head_request(&client, &url).await?;
        tracing::debug!(%url, size = remote.size, etag = ?remote.etag, "Opened remote bundle");
        Ok(Self {
            client,
            key: url.clone(),
            url,
            remote: Arc::new(RwLock::new(remote)),
            base_offset: 0,
            transferred_bytes: Arc::new(AtomicU64::new(0)),
            max_retry: config.max_retry,
        })
    }

    /// Total bytes received from the network across all clones.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// The etag most recently reported by the server.
    pub fn etag(&self) -> Option<String> {
        self.remote.read().etag.clone()
    }

    fn total_size(&self) -> u64 {
        self.remote.read().size
    }

    fn mark_stale(&self) {
        self.remote.write().stale = true;
    }

    async fn fetch(&self, offset: u64, length: u64, etag: Option<&str>) -> Result<RangeResponse> {
        let start = self.base_offset + offset;
        let end = start + length - 1;

        let mut data = BytesMut::with_capacity(length as usize);
        let mut response = RangeResponse::default();
        let mut retry_count = 0;

        while (data.len() as u64) < length {
            let current_start = start + data.len() as u64;
            let mut request = self
                .client
                .get(&self.url)
                .header(RANGE, format!("bytes={current_start}-{end}"));
            if let Some(etag) = etag {
                request = request.header(IF_MATCH, etag);
            }

            match request.send().await {
                Ok(resp) => {
                    if resp.status() == StatusCode::PRECONDITION_FAILED {
                        self.mark_stale();
                        return Err(Error::EtagMismatch {
                            expected: etag.unwrap_or_default().to_string(),
                            actual: header_str(resp.headers(), ETAG.as_str()),
                        });
                    }
                    if resp.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(Error::HttpStatus(resp.status().as_u16()));
                    }

                    let headers = resp.headers();
                    response.etag = header_str(headers, ETAG.as_str());
                    response.cache_control = header_str(headers, CACHE_CONTROL.as_str());
                    response.expires = header_str(headers, EXPIRES.as_str());
                    if response.etag.is_some()
                        && let Err(err) = check_etag(etag, response.etag.as_deref())
                    {
                        self.mark_stale();
                        return Err(err);
                    }
                    if etag.is_none()
                        && let Some(total) = header_str(headers, CONTENT_RANGE.as_str())
                            .as_deref()
                            .and_then(content_range_total)
                    {
                        let mut remote = self.remote.write();
                        remote.size = total;
                        if response.etag.is_some() {
                            remote.etag = response.etag.clone();
                        }
                    }

                    let bytes = resp.bytes().await?;
                    let remaining = (length - data.len() as u64) as usize;
                    let chunk_len = bytes.len().min(remaining);
                    if chunk_len == 0 {
                        return Err(Error::format("server returned an empty range"));
                    }
                    data.extend_from_slice(&bytes[..chunk_len]);

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        retry = retry_count,
                        max_retry = self.max_retry,
                        error = %e,
                        "Connection error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        response.data = data.freeze();
        Ok(response)
    }
}

#[async_trait]
impl RangeSource for HttpSource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn size(&self) -> Result<u64> {
        if self.remote.read().stale {
            let remote = head_request(&self.client, &self.url).await?;
            tracing::debug!(url = %self.url, size = remote.size, "Refreshed remote bundle length");
            *self.remote.write() = remote;
        }
        Ok(self.total_size().saturating_sub(self.base_offset))
    }

    async fn read_range(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
        etag: Option<&str>,
    ) -> Result<RangeResponse> {
        check_bounds(offset, length, self.total_size().saturating_sub(self.base_offset))?;
        if length == 0 {
            return Ok(RangeResponse::new(Bytes::new(), self.etag()));
        }

        tracing::debug!(url = %self.url, offset, length, "Fetching remote range");
        match cancel {
            Some(token) => tokio::select! {
                resp = self.fetch(offset, length, etag) => resp,
                _ = token.cancelled() => Err(Error::Cancelled),
            },
            None => self.fetch(offset, length, etag).await,
        }
    }

    fn slice_at(&self, base_offset: u64) -> Arc<dyn RangeSource> {
        let mut slice = self.clone();
        slice.base_offset = self.base_offset + base_offset;
        slice.key = format!("{}@{}", self.url, slice.base_offset);
        Arc::new(slice)
    }
}

async fn head_request(client: &Client, url: &str) -> Result<Remote> {
    let resp = client.head(url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::HttpStatus(resp.status().as_u16()));
    }

    let headers = resp.headers();
    let accept_ranges = header_str(headers, ACCEPT_RANGES.as_str()).unwrap_or_default();
    if !accept_ranges.contains("bytes") {
        return Err(Error::RangeNotSupported);
    }

    let size = header_str(headers, CONTENT_LENGTH.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::format("remote server did not return Content-Length"))?;
    Ok(Remote {
        size,
        etag: header_str(headers, ETAG.as_str()),
        stale: false,
    })
}

/// Total length from a `Content-Range: bytes a-b/total` value.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
