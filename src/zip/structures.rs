use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;

use crate::error::{Error, Result};

/// Value of a 32-bit size or offset field whose real value lives in the
/// ZIP64 extra field.
pub const ZIP64_SENTINEL: u32 = 0xFFFFFFFF;

/// Header id of the ZIP64 extended information extra field.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }
}

/// Where the central directory lives and how many entries it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralDirectoryLocation {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

/// End of Central Directory (EOCD) - 22 bytes without comment
pub struct EndOfCentralDirectory {
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x06054b50;
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || read_u32(data, 0)? != Self::SIGNATURE {
            return Err(Error::format("not a ZIP/ZIP64 archive"));
        }

        Ok(Self {
            total_entries: read_u16(data, 10)?,
            cd_size: read_u32(data, 12)?,
            cd_offset: read_u32(data, 16)?,
        })
    }
}

impl From<EndOfCentralDirectory> for CentralDirectoryLocation {
    fn from(eocd: EndOfCentralDirectory) -> Self {
        Self {
            total_entries: eocd.total_entries as u64,
            cd_size: eocd.cd_size as u64,
            cd_offset: eocd.cd_offset as u64,
        }
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: u32 = 0x06064b50;
    pub const MIN_SIZE: usize = 56;
    /// Locator record that sits between the ZIP64 record and the EOCD.
    pub const LOCATOR_SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || read_u32(data, 0)? != Self::SIGNATURE {
            return Err(Error::format("invalid ZIP64 end of central directory"));
        }

        Ok(Self {
            total_entries: read_u64(data, 32)?,
            cd_size: read_u64(data, 40)?,
            cd_offset: read_u64(data, 48)?,
        })
    }
}

impl From<Zip64EOCD> for CentralDirectoryLocation {
    fn from(eocd: Zip64EOCD) -> Self {
        Self {
            total_entries: eocd.total_entries,
            cd_size: eocd.cd_size,
            cd_offset: eocd.cd_offset,
        }
    }
}

/// Bytes read from the end of an archive: a ZIP64 record, its locator and
/// a comment-less EOCD.
pub const TAIL_SIZE: usize =
    Zip64EOCD::MIN_SIZE + Zip64EOCD::LOCATOR_SIZE + EndOfCentralDirectory::SIZE;

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: u32 = 0x02014b50;
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIZE: usize = 30;

/// Fixed part of a central directory file header.
#[derive(Debug, Clone, Copy)]
pub struct CentralDirectoryHeader {
    pub compression_method: u16,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub lfh_offset: u32,
}

impl CentralDirectoryHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < CDFH_MIN_SIZE {
            return Err(Error::format("truncated central directory file header"));
        }

        Ok(Self {
            compression_method: read_u16(data, 10)?,
            uncompressed_size: read_u32(data, 20)?,
            compressed_size: read_u32(data, 24)?,
            file_name_length: read_u16(data, 28)?,
            extra_field_length: read_u16(data, 30)?,
            file_comment_length: read_u16(data, 32)?,
            lfh_offset: read_u32(data, 42)?,
        })
    }

    /// Length of the whole record including its variable-length parts.
    pub fn record_len(&self) -> usize {
        CDFH_MIN_SIZE
            + self.file_name_length as usize
            + self.extra_field_length as usize
            + self.file_comment_length as usize
    }

    pub fn has_zip64_sentinel(&self) -> bool {
        self.uncompressed_size == ZIP64_SENTINEL
            || self.compressed_size == ZIP64_SENTINEL
            || self.lfh_offset == ZIP64_SENTINEL
    }

    /// Length of the ZIP64 extra field the matching local header carries.
    ///
    /// A local header's ZIP64 record only ever holds the two sizes, never
    /// the offset or disk number, so it is sized from the size sentinels
    /// alone.
    pub fn local_zip64_extra_len(&self) -> u64 {
        let fired = [self.uncompressed_size, self.compressed_size]
            .iter()
            .filter(|&&v| v == ZIP64_SENTINEL)
            .count() as u64;
        if fired == 0 { 0 } else { 4 + 8 * fired }
    }
}

/// Location of one logical file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    /// Uncompressed size as claimed by the archive.
    pub size: u64,
    pub compressed_size: u64,
    pub compression: CompressionMethod,
    /// Offset of the local file header.
    pub relative_offset: u64,
    /// Offset of the first payload byte.
    pub absolute_offset: u64,
}

impl FileEntry {
    pub fn is_stored(&self) -> bool {
        self.compression == CompressionMethod::Stored
    }

    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// Path to location map of an archive, tied to the content identity it was
/// read under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryTable {
    entries: HashMap<String, FileEntry>,
    etag: Option<String>,
}

impl DirectoryTable {
    pub fn new(etag: Option<String>) -> Self {
        Self {
            entries: HashMap::new(),
            etag,
        }
    }

    /// Inserts an entry; a later entry with the same path replaces it.
    pub(crate) fn insert(&mut self, entry: FileEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.values()
    }

    /// Entries ordered by where their payload starts in the archive.
    pub fn sorted_by_offset(&self) -> Vec<&FileEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| (e.absolute_offset, e.path.as_str()));
        entries
    }
}

fn cursor_at(data: &[u8], offset: usize) -> Cursor<&[u8]> {
    let mut cursor = Cursor::new(data);
    cursor.set_position(offset as u64);
    cursor
}

fn truncated(_: std::io::Error) -> Error {
    Error::format("record truncated")
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    cursor_at(data, offset)
        .read_u16::<LittleEndian>()
        .map_err(truncated)
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    cursor_at(data, offset)
        .read_u32::<LittleEndian>()
        .map_err(truncated)
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    cursor_at(data, offset)
        .read_u64::<LittleEndian>()
        .map_err(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn header(uncompressed: u32, compressed: u32, offset: u32) -> CentralDirectoryHeader {
        CentralDirectoryHeader {
            compression_method: 0,
            uncompressed_size: uncompressed,
            compressed_size: compressed,
            file_name_length: 4,
            extra_field_length: 0,
            file_comment_length: 0,
            lfh_offset: offset,
        }
    }

    #[rstest]
    #[case::plain(10, 10, 0, 0)]
    #[case::uncompressed_only(ZIP64_SENTINEL, 10, 0, 12)]
    #[case::compressed_only(10, ZIP64_SENTINEL, 0, 12)]
    #[case::both_sizes(ZIP64_SENTINEL, ZIP64_SENTINEL, 0, 20)]
    #[case::offset_only(10, 10, ZIP64_SENTINEL, 0)]
    #[case::everything(ZIP64_SENTINEL, ZIP64_SENTINEL, ZIP64_SENTINEL, 20)]
    fn local_extra_len(
        #[case] uncompressed: u32,
        #[case] compressed: u32,
        #[case] offset: u32,
        #[case] expected: u64,
    ) {
        assert_eq!(header(uncompressed, compressed, offset).local_zip64_extra_len(), expected);
    }

    #[test]
    fn header_reads_uncompressed_size_first() {
        let mut data = [0u8; CDFH_MIN_SIZE];
        data[..4].copy_from_slice(&CDFH_SIGNATURE.to_le_bytes());
        data[20..24].copy_from_slice(&ZIP64_SENTINEL.to_le_bytes());
        data[24..28].copy_from_slice(&1234u32.to_le_bytes());

        let header = CentralDirectoryHeader::from_bytes(&data).unwrap();
        assert_eq!(header.uncompressed_size, ZIP64_SENTINEL);
        assert_eq!(header.compressed_size, 1234);
        assert_eq!(header.local_zip64_extra_len(), 12);
    }

    #[test]
    fn table_iterates_every_entry() {
        let mut table = DirectoryTable::new(Some("\"v1\"".to_string()));
        for (i, path) in ["b.json", "a.json"].iter().enumerate() {
            table.insert(FileEntry {
                path: path.to_string(),
                size: 1,
                compressed_size: 1,
                compression: CompressionMethod::Stored,
                relative_offset: i as u64 * 40,
                absolute_offset: i as u64 * 40 + 36,
            });
        }

        let mut paths: Vec<_> = table.paths().collect();
        paths.sort_unstable();
        assert_eq!(paths, ["a.json", "b.json"]);
        assert_eq!(table.iter().map(|e| e.size).sum::<u64>(), 2);
        let ordered: Vec<_> = table.sorted_by_offset().into_iter().map(|e| e.path.as_str()).collect();
        assert_eq!(ordered, ["b.json", "a.json"]);
    }

    #[test]
    fn eocd_rejects_wrong_signature() {
        let mut data = [0u8; 22];
        data[..4].copy_from_slice(&CDFH_SIGNATURE.to_le_bytes());
        assert!(matches!(
            EndOfCentralDirectory::from_bytes(&data),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn zip64_eocd_reads_fixed_fields() {
        let mut data = [0u8; 56];
        data[..4].copy_from_slice(&Zip64EOCD::SIGNATURE.to_le_bytes());
        data[32..40].copy_from_slice(&3u64.to_le_bytes());
        data[40..48].copy_from_slice(&150u64.to_le_bytes());
        data[48..56].copy_from_slice(&5_000_000_100u64.to_le_bytes());

        let location = CentralDirectoryLocation::from(Zip64EOCD::from_bytes(&data).unwrap());
        assert_eq!(location.total_entries, 3);
        assert_eq!(location.cd_size, 150);
        assert_eq!(location.cd_offset, 5_000_000_100);
    }

    #[test]
    fn short_reads_are_format_errors() {
        assert!(matches!(read_u32(&[1, 2, 3], 0), Err(Error::Format(_))));
        assert!(matches!(read_u16(&[1, 2, 3], 2), Err(Error::Format(_))));
    }

    #[test]
    fn duplicate_paths_keep_the_last_entry() {
        let entry = |offset| FileEntry {
            path: "a.json".to_string(),
            size: 1,
            compressed_size: 1,
            compression: CompressionMethod::Stored,
            relative_offset: offset,
            absolute_offset: offset + 36,
        };
        let mut table = DirectoryTable::new(None);
        table.insert(entry(0));
        table.insert(entry(100));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a.json").unwrap().relative_offset, 100);
    }
}
