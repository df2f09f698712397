//! ZIP archive indexing.
//!
//! This module turns the central directory of a ZIP or ZIP64 archive into a
//! [`DirectoryTable`] mapping each path to the byte range of its payload.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Locating and walking the central directory
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and file data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Offsets are computed without touching local headers: a local header is
//! 30 bytes, the file name, and a ZIP64 extra field only when one of its
//! sizes overflowed. Archives produced for this format carry no other local
//! extra fields and store their payloads uncompressed.
//!
//! ## Limitations
//!
//! - No archive comments (the EOCD must be the last 22 bytes)
//! - No multi-disk archive support
//! - No decompression or CRC checks

mod parser;
mod structures;

pub use parser::{index, locate_central_directory, parse_central_directory};
pub use structures::*;
