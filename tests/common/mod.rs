//! Minimal ZIP writer for building test bundles in memory.
#![allow(dead_code)]

pub mod server;

const LFH_SIGNATURE: u32 = 0x04034b50;
const CDFH_SIGNATURE: u32 = 0x02014b50;
const EOCD_SIGNATURE: u32 = 0x06054b50;
const EOCD64_SIGNATURE: u32 = 0x06064b50;
const LOCATOR_SIGNATURE: u32 = 0x07064b50;
const SENTINEL: u32 = 0xFFFFFFFF;

/// How one entry is written.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// Size recorded in the headers instead of the real payload length.
    pub claimed_size: Option<u64>,
    pub uncompressed_sentinel: bool,
    pub compressed_sentinel: bool,
    pub offset_sentinel: bool,
    pub method: u16,
}

impl EntryOptions {
    pub fn zip64_size(size: u64) -> Self {
        Self {
            claimed_size: Some(size),
            uncompressed_sentinel: true,
            ..Default::default()
        }
    }
}

struct PendingEntry {
    name: String,
    data: Vec<u8>,
    options: EntryOptions,
}

/// Where an entry landed in the built archive.
#[derive(Debug, Clone)]
pub struct Written {
    pub name: String,
    pub header_offset: u64,
    pub data: Vec<u8>,
}

pub struct Built {
    pub bytes: Vec<u8>,
    pub entries: Vec<Written>,
}

#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<PendingEntry>,
    zip64_tail: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.file_with(name, data, EntryOptions::default())
    }

    pub fn file_with(mut self, name: &str, data: &[u8], options: EntryOptions) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            data: data.to_vec(),
            options,
        });
        self
    }

    /// End the archive with a ZIP64 EOCD and locator before the EOCD.
    pub fn zip64(mut self) -> Self {
        self.zip64_tail = true;
        self
    }

    pub fn build(self) -> Built {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut written = Vec::new();

        for entry in &self.entries {
            let opts = &entry.options;
            let header_offset = out.len() as u64;
            let size = opts.claimed_size.unwrap_or(entry.data.len() as u64);

            let mut local_extra = Vec::new();
            if opts.uncompressed_sentinel {
                local_extra.extend_from_slice(&size.to_le_bytes());
            }
            if opts.compressed_sentinel {
                local_extra.extend_from_slice(&size.to_le_bytes());
            }
            let local_extra = zip64_record(&local_extra);

            put_u32(&mut out, LFH_SIGNATURE);
            put_u16(&mut out, 45);
            put_u16(&mut out, 0);
            put_u16(&mut out, opts.method);
            put_u32(&mut out, 0); // time, date
            put_u32(&mut out, 0); // crc
            put_u32(&mut out, field(size, opts.uncompressed_sentinel));
            put_u32(&mut out, field(size, opts.compressed_sentinel));
            put_u16(&mut out, entry.name.len() as u16);
            put_u16(&mut out, local_extra.len() as u16);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&local_extra);
            out.extend_from_slice(&entry.data);

            let mut cd_extra = Vec::new();
            if opts.uncompressed_sentinel {
                cd_extra.extend_from_slice(&size.to_le_bytes());
            }
            if opts.compressed_sentinel {
                cd_extra.extend_from_slice(&size.to_le_bytes());
            }
            if opts.offset_sentinel {
                cd_extra.extend_from_slice(&header_offset.to_le_bytes());
            }
            let cd_extra = zip64_record(&cd_extra);

            put_u32(&mut central, CDFH_SIGNATURE);
            put_u16(&mut central, 45);
            put_u16(&mut central, 45);
            put_u16(&mut central, 0);
            put_u16(&mut central, opts.method);
            put_u32(&mut central, 0);
            put_u32(&mut central, 0);
            put_u32(&mut central, field(size, opts.uncompressed_sentinel));
            put_u32(&mut central, field(size, opts.compressed_sentinel));
            put_u16(&mut central, entry.name.len() as u16);
            put_u16(&mut central, cd_extra.len() as u16);
            put_u16(&mut central, 0); // comment
            put_u16(&mut central, 0); // disk
            put_u16(&mut central, 0); // internal attributes
            put_u32(&mut central, 0); // external attributes
            put_u32(&mut central, field(header_offset, opts.offset_sentinel));
            central.extend_from_slice(entry.name.as_bytes());
            central.extend_from_slice(&cd_extra);

            written.push(Written {
                name: entry.name.clone(),
                header_offset,
                data: entry.data.clone(),
            });
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        let count = self.entries.len() as u64;
        out.extend_from_slice(&central);

        if self.zip64_tail {
            let eocd64_offset = out.len() as u64;
            put_u32(&mut out, EOCD64_SIGNATURE);
            put_u64(&mut out, 44);
            put_u16(&mut out, 45);
            put_u16(&mut out, 45);
            put_u32(&mut out, 0);
            put_u32(&mut out, 0);
            put_u64(&mut out, count);
            put_u64(&mut out, count);
            put_u64(&mut out, cd_size);
            put_u64(&mut out, cd_offset);

            put_u32(&mut out, LOCATOR_SIGNATURE);
            put_u32(&mut out, 0);
            put_u64(&mut out, eocd64_offset);
            put_u32(&mut out, 1);
        }

        put_u32(&mut out, EOCD_SIGNATURE);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        let short_count = if self.zip64_tail { 0xFFFF } else { count as u16 };
        put_u16(&mut out, short_count);
        put_u16(&mut out, short_count);
        put_u32(&mut out, field(cd_size, self.zip64_tail));
        put_u32(&mut out, field(cd_offset, self.zip64_tail));
        put_u16(&mut out, 0);

        Built {
            bytes: out,
            entries: written,
        }
    }
}

/// Payload offset read straight from the local file header at
/// `header_offset`.
pub fn payload_offset(archive: &[u8], header_offset: u64) -> u64 {
    let h = header_offset as usize;
    assert_eq!(u32::from_le_bytes(archive[h..h + 4].try_into().unwrap()), LFH_SIGNATURE);
    let name_len = u16::from_le_bytes([archive[h + 26], archive[h + 27]]) as u64;
    let extra_len = u16::from_le_bytes([archive[h + 28], archive[h + 29]]) as u64;
    header_offset + 30 + name_len + extra_len
}

fn zip64_record(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut record = Vec::with_capacity(4 + data.len());
    put_u16(&mut record, 0x0001);
    put_u16(&mut record, data.len() as u16);
    record.extend_from_slice(data);
    record
}

fn field(value: u64, sentinel: bool) -> u32 {
    if sentinel { SENTINEL } else { value as u32 }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
