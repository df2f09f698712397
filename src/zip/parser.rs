//! Central directory indexing.
//!
//! ZIP files are designed to be read from the end:
//! 1. Read a fixed-size tail holding either a ZIP64 EOCD (plus locator and
//!    EOCD) or a plain EOCD
//! 2. Read the Central Directory in a single request
//! 3. Decode every entry into the absolute offset of its payload
//!
//! Local file headers are never fetched; their length is derived from the
//! central directory, so listing a remote archive costs two range requests.

use crate::error::{Error, Result};
use crate::io::RangeSource;

use super::structures::*;

/// Read the archive behind `source` into a [`DirectoryTable`].
///
/// # Errors
///
/// Returns [`Error::Format`] if a magic number does not match or a record
/// is truncated, and propagates source errors unchanged.
pub async fn index<S: RangeSource + ?Sized>(source: &S) -> Result<DirectoryTable> {
    let size = source.size().await?;
    if size < EndOfCentralDirectory::SIZE as u64 {
        return Err(Error::format("not a ZIP/ZIP64 archive"));
    }

    let tail_len = size.min(TAIL_SIZE as u64);
    let tail = source.read_range(size - tail_len, tail_len, None, None).await?;
    let location = locate_central_directory(&tail.data)?;

    tracing::debug!(
        key = source.key(),
        entries = location.total_entries,
        cd_size = location.cd_size,
        cd_offset = location.cd_offset,
        "Located central directory"
    );

    if location.total_entries == 0 || location.cd_size == 0 {
        return Ok(DirectoryTable::new(tail.etag));
    }

    // Tagged with the tail's etag so both reads see the same content.
    let cd = source
        .read_range(location.cd_offset, location.cd_size, None, tail.etag.as_deref())
        .await?;
    let mut table = DirectoryTable::new(cd.etag.clone().or(tail.etag));
    parse_central_directory(&cd.data, location.total_entries, &mut table)?;
    Ok(table)
}

/// Decode the archive tail into the central directory's location.
pub fn locate_central_directory(tail: &[u8]) -> Result<CentralDirectoryLocation> {
    if tail.len() == TAIL_SIZE && read_u32(tail, 0)? == Zip64EOCD::SIGNATURE {
        return Ok(Zip64EOCD::from_bytes(tail)?.into());
    }

    let eocd_start = tail
        .len()
        .checked_sub(EndOfCentralDirectory::SIZE)
        .ok_or_else(|| Error::format("not a ZIP/ZIP64 archive"))?;
    Ok(EndOfCentralDirectory::from_bytes(&tail[eocd_start..])?.into())
}

/// Walk the central directory, adding one [`FileEntry`] per record.
///
/// Stops at whichever comes first: the end of `cd` or `total_entries`
/// records.
pub fn parse_central_directory(
    cd: &[u8],
    total_entries: u64,
    table: &mut DirectoryTable,
) -> Result<()> {
    if read_u32(cd, 0)? != CDFH_SIGNATURE {
        return Err(Error::format("wrong magic number for central directory"));
    }

    let mut cursor = 0usize;
    for _ in 0..total_entries {
        if cursor >= cd.len() {
            break;
        }
        let record = &cd[cursor..];
        let header = CentralDirectoryHeader::from_bytes(record)?;
        if record.len() < header.record_len() {
            return Err(Error::format("truncated central directory entry"));
        }

        table.insert(parse_entry(&header, record)?);
        cursor += header.record_len();
    }

    Ok(())
}

/// Decode one central directory record whose fixed part is `header`.
fn parse_entry(header: &CentralDirectoryHeader, record: &[u8]) -> Result<FileEntry> {
    let name_end = CDFH_MIN_SIZE + header.file_name_length as usize;
    let name_bytes = &record[CDFH_MIN_SIZE..name_end];
    let path = String::from_utf8_lossy(name_bytes).into_owned();

    let mut size = header.uncompressed_size as u64;
    let mut compressed_size = header.compressed_size as u64;
    let mut relative_offset = header.lfh_offset as u64;

    if header.has_zip64_sentinel() && header.extra_field_length > 0 {
        let extra = &record[name_end..name_end + header.extra_field_length as usize];
        if let Some(zip64) = find_zip64_record(extra)? {
            let mut slots = Zip64Slots::new(zip64);
            if header.uncompressed_size == ZIP64_SENTINEL {
                size = slots.next()?;
            }
            if header.compressed_size == ZIP64_SENTINEL {
                compressed_size = slots.next()?;
            }
            if header.lfh_offset == ZIP64_SENTINEL {
                relative_offset = slots.next()?;
            }
        }
    }

    let absolute_offset = relative_offset
        + LFH_SIZE as u64
        + header.file_name_length as u64
        + header.local_zip64_extra_len();

    Ok(FileEntry {
        path,
        size,
        compressed_size,
        compression: CompressionMethod::from_u16(header.compression_method),
        relative_offset,
        absolute_offset,
    })
}

/// Find the data of the first ZIP64 record in an extra field block.
fn find_zip64_record(extra: &[u8]) -> Result<Option<&[u8]>> {
    let mut offset = 0usize;
    while offset + 4 <= extra.len() {
        let header_id = read_u16(extra, offset)?;
        let data_size = read_u16(extra, offset + 2)? as usize;
        let data_start = offset + 4;
        let data_end = (data_start + data_size).min(extra.len());

        if header_id == ZIP64_EXTRA_ID {
            return Ok(Some(&extra[data_start..data_end]));
        }
        offset = data_start + data_size;
    }
    Ok(None)
}

/// Sequential reader over the 8-byte values of a ZIP64 record.
struct Zip64Slots<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Zip64Slots<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn next(&mut self) -> Result<u64> {
        let value = read_u64(self.data, self.offset)
            .map_err(|_| Error::format("ZIP64 extra field is too short"))?;
        self.offset += 8;
        Ok(value)
    }
}
