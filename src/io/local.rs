use std::fs::{self, File, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::{RangeResponse, RangeSource, check_bounds, check_etag};
use crate::error::{Error, Result};

/// Local file source with positional reads.
///
/// The etag is derived from the file's length and modification time as
/// seen at its path. When a bundle is replaced on disk (typically by a
/// rename over the old file) the handle is reopened, so reads always hit
/// the current file.
#[derive(Clone)]
pub struct LocalSource {
    key: String,
    path: PathBuf,
    file: Arc<RwLock<Arc<File>>>,
    base_offset: u64,
}

impl LocalSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            key: path.display().to_string(),
            path: path.to_path_buf(),
            file: Arc::new(RwLock::new(Arc::new(file))),
            base_offset: 0,
        })
    }

    /// Current content identity of the file at this source's path.
    pub fn etag(&self) -> Result<String> {
        Ok(etag_of(&fs::metadata(&self.path)?))
    }

    /// The open handle, reopened first if the path now names another file.
    fn current_file(&self) -> Result<(Arc<File>, Metadata)> {
        let on_disk = fs::metadata(&self.path)?;
        let file = self.file.read().clone();
        let opened = file.metadata()?;
        if etag_of(&opened) == etag_of(&on_disk) {
            return Ok((file, opened));
        }

        tracing::debug!(key = %self.key, "File changed on disk, reopening");
        let file = Arc::new(File::open(&self.path)?);
        let meta = file.metadata()?;
        *self.file.write() = file.clone();
        Ok((file, meta))
    }
}

fn etag_of(meta: &Metadata) -> String {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("\"{:x}-{:x}\"", meta.len(), mtime)
}

#[async_trait]
impl RangeSource for LocalSource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn size(&self) -> Result<u64> {
        let (_, meta) = self.current_file()?;
        Ok(meta.len().saturating_sub(self.base_offset))
    }

    async fn read_range(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
        etag: Option<&str>,
    ) -> Result<RangeResponse> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let (file, meta) = self.current_file()?;
        let current = etag_of(&meta);
        check_etag(etag, Some(&current))?;
        check_bounds(offset, length, meta.len().saturating_sub(self.base_offset))?;

        let position = self.base_offset + offset;
        let data = tokio::task::spawn_blocking(move || read_exact_at(&file, position, length as usize))
            .await
            .map_err(|e| Error::Io(Arc::new(std::io::Error::other(e))))??;

        tracing::debug!(key = %self.key, offset, length, "Read local range");
        Ok(RangeResponse::new(Bytes::from(data), Some(current)))
    }

    fn slice_at(&self, base_offset: u64) -> Arc<dyn RangeSource> {
        let mut slice = self.clone();
        slice.base_offset = self.base_offset + base_offset;
        slice.key = format!("{}@{}", self.key, slice.base_offset);
        Arc::new(slice)
    }
}

fn read_exact_at(file: &File, offset: u64, length: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; length];

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(&mut buf, offset)?;
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut filled = 0;
        while filled < length {
            let n = file.seek_read(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
    }

    Ok(buf)
}
