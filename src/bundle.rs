//! A single archive bound to a shared cache.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::cache::{Resource, ResourceCache};
use crate::error::{Error, Result};
use crate::io::RangeSource;
use crate::zip::DirectoryTable;

/// High-level access to the files of one archive.
///
/// Every lookup goes through the [`ResourceCache`]; when the source reports
/// that its content changed, the cache is invalidated and the lookup is
/// retried once.
pub struct Bundle<S: RangeSource + ?Sized> {
    source: Arc<S>,
    cache: ResourceCache,
}

impl<S: RangeSource + ?Sized + 'static> Bundle<S> {
    /// Open a bundle with a private cache.
    pub fn new(source: Arc<S>) -> Self {
        Self::with_cache(source, ResourceCache::default())
    }

    /// Open a bundle sharing `cache` with other bundles.
    pub fn with_cache(source: Arc<S>, cache: ResourceCache) -> Self {
        Self { source, cache }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// The archive's directory table.
    pub async fn file_list(&self) -> Result<Arc<DirectoryTable>> {
        self.cache
            .revalidate_once(&self.source, || self.cache.get_directory(&self.source))
            .await
    }

    /// Fetch `path` with its caching hints, or `None` if the archive has no
    /// such file.
    ///
    /// Each path segment may carry `,`-separated variants (`tiles,raster/x`);
    /// only the first variant of every segment is looked up.
    pub async fn get_resource(
        &self,
        path: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Resource>> {
        let path = first_variant(path);
        self.cache
            .revalidate_once(&self.source, || self.get_resource_attempt(&path, cancel))
            .await
    }

    /// Fetch only the bytes of `path`.
    pub async fn get_file(
        &self,
        path: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Bytes>> {
        Ok(self.get_resource(path, cancel).await?.map(|r| r.data))
    }

    /// A source positioned at the payload of `path`, for handing a nested
    /// archive to another reader.
    pub async fn sub_source(&self, path: &str) -> Result<Option<Arc<dyn RangeSource>>> {
        let table = self.file_list().await?;
        Ok(table
            .get(path)
            .map(|entry| self.source.slice_at(entry.absolute_offset)))
    }

    async fn get_resource_attempt(
        &self,
        path: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Resource>> {
        let table = self.cache.get_directory(&self.source).await?;
        match table.get(path) {
            None => {
                tracing::debug!(path, "File not found in bundle");
                return Ok(None);
            }
            Some(entry) if !entry.is_stored() => {
                return Err(Error::UnsupportedCompression {
                    path: path.to_string(),
                    method: entry.compression,
                });
            }
            Some(_) => {}
        }
        self.cache
            .get_resource(&self.source, path, &table, cancel)
            .await
    }
}

fn first_variant(path: &str) -> String {
    if !path.contains(',') {
        return path.to_string();
    }
    path.split('/')
        .map(|segment| segment.split(',').next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("/")
}
