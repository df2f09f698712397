//! Shared, single-flight cache for directory tables and resources.
//!
//! Every lookup is memoized as a [`Shared`] future: the first caller for a
//! key starts the work, everyone arriving while it runs (or after it
//! finished) awaits the same result. Failures are not kept: a future that
//! settles with an error removes its own entry, so the next caller retries.
//!
//! ```text
//! ResourceCache
//! └── State (parking_lot::Mutex, never held across .await)
//!     ├── entries: CacheKey -> CacheEntry { last_used, value }
//!     │   ├── Directory(source key)          -> Shared<Arc<DirectoryTable>>
//!     │   └── Resource(source key, path)     -> Shared<Resource>
//!     └── invalidations: source key -> Shared<()>
//! ```

mod config;

pub use config::CacheConfig;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::io::{RangeResponse, RangeSource};
use crate::zip::{self, DirectoryTable};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Bytes of one archive entry plus the caching hints the source sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub data: Bytes,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

impl From<RangeResponse> for Resource {
    fn from(resp: RangeResponse) -> Self {
        Self {
            data: resp.data,
            cache_control: resp.cache_control,
            expires: resp.expires,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Directory(String),
    Resource { source: String, path: String },
}

impl CacheKey {
    fn source(&self) -> &str {
        match self {
            Self::Directory(source) | Self::Resource { source, .. } => source,
        }
    }
}

#[derive(Clone)]
enum CacheValue {
    Directory(SharedResult<Arc<DirectoryTable>>),
    Resource(SharedResult<Resource>),
}

/// Values that can live in the cache map.
trait Cached: Clone + Send + Sync + Sized + 'static {
    fn wrap(value: SharedResult<Self>) -> CacheValue;
    fn unwrap(value: &CacheValue) -> Option<SharedResult<Self>>;
}

impl Cached for Arc<DirectoryTable> {
    fn wrap(value: SharedResult<Self>) -> CacheValue {
        CacheValue::Directory(value)
    }

    fn unwrap(value: &CacheValue) -> Option<SharedResult<Self>> {
        match value {
            CacheValue::Directory(fut) => Some(fut.clone()),
            CacheValue::Resource(_) => None,
        }
    }
}

impl Cached for Resource {
    fn wrap(value: SharedResult<Self>) -> CacheValue {
        CacheValue::Resource(value)
    }

    fn unwrap(value: &CacheValue) -> Option<SharedResult<Self>> {
        match value {
            CacheValue::Resource(fut) => Some(fut.clone()),
            CacheValue::Directory(_) => None,
        }
    }
}

struct CacheEntry {
    last_used: u64,
    /// Distinguishes this entry from a later one under the same key.
    id: u64,
    value: CacheValue,
}

struct State {
    entries: HashMap<CacheKey, CacheEntry>,
    invalidations: HashMap<String, SharedResult<()>>,
    counter: u64,
    max_entries: usize,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Evict the least recently used entry if the map is full.
    fn prune(&mut self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            tracing::debug!(?key, "Evicting least recently used cache entry");
            self.entries.remove(&key);
        }
    }

    fn remove_if_current(&mut self, key: &CacheKey, id: u64) {
        if self.entries.get(key).is_some_and(|entry| entry.id == id) {
            self.entries.remove(key);
        }
    }

    fn remove_source(&mut self, source: &str) {
        self.entries.retain(|key, _| key.source() != source);
    }
}

/// Memoizes directory tables and resource fetches per source identity.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct ResourceCache {
    state: Arc<Mutex<State>>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                invalidations: HashMap::new(),
                counter: 0,
                max_entries: config.max_entries.max(1),
            })),
        }
    }

    /// Number of cached directory tables and resources.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn contains_directory(&self, source_key: &str) -> bool {
        let key = CacheKey::Directory(source_key.to_string());
        self.state.lock().entries.contains_key(&key)
    }

    pub fn contains_resource(&self, source_key: &str, path: &str) -> bool {
        let key = CacheKey::Resource {
            source: source_key.to_string(),
            path: path.to_string(),
        };
        self.state.lock().entries.contains_key(&key)
    }

    /// The directory table of `source`, indexed at most once per identity.
    pub async fn get_directory<S>(&self, source: &Arc<S>) -> Result<Arc<DirectoryTable>>
    where
        S: RangeSource + ?Sized + 'static,
    {
        let key = CacheKey::Directory(source.key().to_string());
        let source = source.clone();
        self.shared(key, move || {
            async move { zip::index(source.as_ref()).await.map(Arc::new) }.boxed()
        })
        .await
    }

    /// The bytes of `path`, located through `table`.
    ///
    /// Returns `Ok(None)` when `table` has no such path. The read is tagged
    /// with the table's etag, so a source whose content changed fails with
    /// [`Error::EtagMismatch`]. `cancel` only abandons this caller's wait;
    /// the shared read keeps going for everyone else.
    pub async fn get_resource<S>(
        &self,
        source: &Arc<S>,
        path: &str,
        table: &DirectoryTable,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Resource>>
    where
        S: RangeSource + ?Sized + 'static,
    {
        let Some(entry) = table.get(path) else {
            tracing::debug!(key = source.key(), path, "Path not found in directory");
            return Ok(None);
        };

        let key = CacheKey::Resource {
            source: source.key().to_string(),
            path: path.to_string(),
        };
        let (offset, length) = (entry.absolute_offset, entry.size);
        let etag = table.etag().map(str::to_string);
        let source = source.clone();
        let fut = self.shared(key, move || {
            async move {
                let resp = source
                    .read_range(offset, length, None, etag.as_deref())
                    .await?;
                Ok(Resource::from(resp))
            }
            .boxed()
        });

        wait(fut, cancel).await.map(Some)
    }

    /// Forget everything cached for `source` and index it again.
    ///
    /// Concurrent calls for the same source share one re-index.
    pub async fn invalidate<S>(&self, source: &Arc<S>) -> Result<()>
    where
        S: RangeSource + ?Sized + 'static,
    {
        let key = source.key().to_string();
        let fut = {
            let mut state = self.state.lock();
            match state.invalidations.get(&key).cloned() {
                Some(fut) => fut,
                None => {
                    tracing::debug!(key = %key, "Invalidating cached directory");
                    state.remove_source(&key);

                    let weak = Arc::downgrade(&self.state);
                    let source = source.clone();
                    let cleanup_key = key.clone();
                    let fut = async move {
                        let Some(cache) = upgrade(&weak) else {
                            return Ok(());
                        };
                        let result = cache.get_directory(&source).await.map(|_| ());
                        cache.state.lock().invalidations.remove(&cleanup_key);
                        result
                    }
                    .boxed()
                    .shared();
                    state.invalidations.insert(key, fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    /// Run `op`, and if it fails because `source` changed underneath it,
    /// invalidate once and run it one more time.
    ///
    /// A second mismatch is returned to the caller.
    pub async fn revalidate_once<S, T, F, Fut>(&self, source: &Arc<S>, mut op: F) -> Result<T>
    where
        S: RangeSource + ?Sized + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Err(err) if err.is_etag_mismatch() => {
                tracing::warn!(key = source.key(), error = %err, "Source changed, re-indexing");
                self.invalidate(source).await?;
                op().await
            }
            other => other,
        }
    }

    /// Get the in-flight or completed future for `key`, starting `make`
    /// if there is none.
    fn shared<T, F>(&self, key: CacheKey, make: F) -> SharedResult<T>
    where
        T: Cached,
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let mut state = self.state.lock();
        let tick = state.tick();

        if let Some(entry) = state.entries.get_mut(&key)
            && let Some(fut) = T::unwrap(&entry.value)
        {
            entry.last_used = tick;
            tracing::trace!(?key, "Cache hit");
            return fut;
        }

        tracing::trace!(?key, "Cache miss");
        state.prune();

        let weak = Arc::downgrade(&self.state);
        let cleanup_key = key.clone();
        let inner = make();
        let fut = async move {
            let result = inner.await;
            if result.is_err()
                && let Some(state) = weak.upgrade()
            {
                state.lock().remove_if_current(&cleanup_key, tick);
            }
            result
        }
        .boxed()
        .shared();

        state.entries.insert(
            key,
            CacheEntry {
                last_used: tick,
                id: tick,
                value: T::wrap(fut.clone()),
            },
        );
        fut
    }
}

fn upgrade(weak: &Weak<Mutex<State>>) -> Option<ResourceCache> {
    weak.upgrade().map(|state| ResourceCache { state })
}

async fn wait<T: Clone>(fut: SharedResult<T>, cancel: Option<&CancellationToken>) -> Result<T> {
    match cancel {
        Some(token) => tokio::select! {
            result = fut => result,
            _ = token.cancelled() => Err(Error::Cancelled),
        },
        None => fut.await,
    }
}
