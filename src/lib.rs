//! # mapbundle
//!
//! Index ZIP-packaged map bundles through byte-range reads and serve their
//! files from a shared, single-flight cache.
//!
//! A bundle is an ordinary ZIP or ZIP64 archive whose entries are stored
//! uncompressed. Only the archive tail and the central directory are read
//! to build the path table; each file is then one range read, so bundles on
//! an HTTP server are usable without downloading them.
//!
//! ## Features
//!
//! - Local files, HTTP/HTTPS URLs (Range requests) and in-memory buffers
//! - ZIP64 sizes and offsets, including the local-header extra field rules
//! - One in-flight fetch per directory or file, shared by all callers
//! - Etag-based invalidation with a single retry when content changes
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mapbundle::{Bundle, HttpSource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(HttpSource::new("https://example.com/map.zip".to_string()).await?);
//!     let bundle = Bundle::new(source);
//!
//!     for entry in bundle.file_list().await?.sorted_by_offset() {
//!         println!("{} ({} bytes)", entry.path, entry.size);
//!     }
//!
//!     if let Some(style) = bundle.get_file("styles/basic.json", None).await? {
//!         println!("{}", String::from_utf8_lossy(&style));
//!     }
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod cache;
pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use bundle::Bundle;
pub use cache::{CacheConfig, Resource, ResourceCache};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{HttpConfig, HttpSource, LocalSource, MemorySource, RangeResponse, RangeSource};
pub use zip::{DirectoryTable, FileEntry};
