use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use std::io::Cursor;

use crate::error::ArchiveError;

type Result<T> = std::result::Result<T, ArchiveError>;

/// Placeholder stored in 32-bit fields whose real value lives in a ZIP64 record
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;
/// Placeholder stored in 16-bit entry counts when a ZIP64 record is present
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// Version needed to extract: deflate
pub const VERSION_DEFLATE: u16 = 20;
/// Version needed to extract: ZIP64 extensions
pub const VERSION_ZIP64: u16 = 45;
/// Version made by: UNIX host, APPNOTE 4.5
pub const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_ZIP64;

/// General purpose flag: sizes and CRC follow the data in a descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose flag: file name is UTF-8
pub const FLAG_UTF8: u16 = 1 << 11;

/// Extra field id of the ZIP64 extended information block
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Regular file, rw-r--r--, in the high half of the external attributes
pub const UNIX_FILE_ATTRIBUTES: u32 = 0o100644 << 16;

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

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// MS-DOS date and time as stored in ZIP headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// Convert a wall-clock time; DOS dates cannot go below 1980
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        if at.year() < 1980 {
            return Self {
                time: 0,
                date: (1 << 5) | 1,
            };
        }
        let year = (at.year() - 1980).min(127) as u16;
        let date = (year << 9) | ((at.month() as u16) << 5) | at.day() as u16;
        let time =
            ((at.hour() as u16) << 11) | ((at.minute() as u16) << 5) | (at.second() as u16 / 2);
        Self { time, date }
    }

    /// Current local time
    pub fn now() -> Self {
        Self::from_datetime(&chrono::Local::now())
    }
}

/// Local File Header (LFH) - 30 bytes plus name
pub struct LocalFileHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub file_name: &'a str,
}

impl LocalFileHeader<'_> {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    /// Serialize with zeroed CRC and sizes; they follow in a [`DataDescriptor`]
    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.file_name.as_bytes();
        let mut out = Vec::with_capacity(Self::SIZE + name.len());
        out.extend_from_slice(Self::SIGNATURE);
        put_u16(&mut out, self.version_needed);
        put_u16(&mut out, self.flags);
        put_u16(&mut out, self.method.as_u16());
        put_u16(&mut out, self.modified.time);
        put_u16(&mut out, self.modified.date);
        put_u32(&mut out, 0);
        put_u32(&mut out, 0);
        put_u32(&mut out, 0);
        put_u16(&mut out, name.len() as u16);
        put_u16(&mut out, 0);
        out.extend_from_slice(name);
        out
    }
}

/// Data descriptor written after each entry's data
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub const SIGNATURE: &'static [u8] = b"PK\x07\x08";

    /// Whether the sizes need the 64-bit descriptor layout
    pub fn is_zip64(&self) -> bool {
        self.compressed_size >= ZIP64_MARKER_32 as u64
            || self.uncompressed_size >= ZIP64_MARKER_32 as u64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(Self::SIGNATURE);
        put_u32(&mut out, self.crc32);
        if self.is_zip64() {
            put_u64(&mut out, self.compressed_size);
            put_u64(&mut out, self.uncompressed_size);
        } else {
            put_u32(&mut out, self.compressed_size as u32);
            put_u32(&mut out, self.uncompressed_size as u32);
        }
        out
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Everything the central directory needs to know about one written entry
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub file_name: String,
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub lfh_offset: u64,
}

impl CentralDirectoryHeader {
    /// Serialize, moving oversized fields into a ZIP64 extra block
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut extra = Vec::new();
        let uncompressed = self.zip64_field(self.uncompressed_size, &mut extra);
        let compressed = self.zip64_field(self.compressed_size, &mut extra);
        let offset = self.zip64_field(self.lfh_offset, &mut extra);

        let mut extra_block = Vec::new();
        if !extra.is_empty() {
            put_u16(&mut extra_block, ZIP64_EXTRA_ID);
            put_u16(&mut extra_block, extra.len() as u16);
            extra_block.extend_from_slice(&extra);
        }
        let version_needed = if extra_block.is_empty() {
            VERSION_DEFLATE
        } else {
            VERSION_ZIP64
        };

        let name = self.file_name.as_bytes();
        let mut out = Vec::with_capacity(CDFH_MIN_SIZE + name.len() + extra_block.len());
        out.extend_from_slice(CDFH_SIGNATURE);
        put_u16(&mut out, VERSION_MADE_BY);
        put_u16(&mut out, version_needed);
        put_u16(&mut out, self.flags);
        put_u16(&mut out, self.method.as_u16());
        put_u16(&mut out, self.modified.time);
        put_u16(&mut out, self.modified.date);
        put_u32(&mut out, self.crc32);
        put_u32(&mut out, compressed);
        put_u32(&mut out, uncompressed);
        put_u16(&mut out, name.len() as u16);
        put_u16(&mut out, extra_block.len() as u16);
        put_u16(&mut out, 0); // comment length
        put_u16(&mut out, 0); // disk number start
        put_u16(&mut out, 0); // internal attributes
        put_u32(&mut out, UNIX_FILE_ATTRIBUTES);
        put_u32(&mut out, offset);
        out.extend_from_slice(name);
        out.extend_from_slice(&extra_block);
        out
    }

    // Extra fields must appear in uncompressed, compressed, offset order
    fn zip64_field(&self, value: u64, extra: &mut Vec<u8>) -> u32 {
        if value >= ZIP64_MARKER_32 as u64 {
            put_u64(extra, value);
            ZIP64_MARKER_32
        } else {
            value as u32
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Classic record for a directory, saturating to ZIP64 markers on overflow
    pub fn for_directory(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        let total_entries = if entries >= ZIP64_MARKER_16 as u64 {
            ZIP64_MARKER_16
        } else {
            entries as u16
        };
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: total_entries,
            total_entries,
            cd_size: saturate_32(cd_size),
            cd_offset: saturate_32(cd_offset),
            comment_len: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(malformed("invalid end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            comment_len: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        put_u16(&mut out, self.disk_number);
        put_u16(&mut out, self.disk_with_cd);
        put_u16(&mut out, self.disk_entries);
        put_u16(&mut out, self.total_entries);
        put_u32(&mut out, self.cd_size);
        put_u32(&mut out, self.cd_offset);
        put_u16(&mut out, self.comment_len);
        out
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_MARKER_16
            || self.total_entries == ZIP64_MARKER_16
            || self.cd_size == ZIP64_MARKER_32
            || self.cd_offset == ZIP64_MARKER_32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(malformed("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_disks: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        put_u32(&mut out, self.disk_with_eocd64);
        put_u64(&mut out, self.eocd64_offset);
        put_u32(&mut out, self.total_disks);
        out
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn for_directory(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            // Size of the record after this field
            eocd64_size: (Self::MIN_SIZE - 12) as u64,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(malformed("invalid ZIP64 end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            version_made_by: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            version_needed: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_number: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::MIN_SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        put_u64(&mut out, self.eocd64_size);
        put_u16(&mut out, self.version_made_by);
        put_u16(&mut out, self.version_needed);
        put_u32(&mut out, self.disk_number);
        put_u32(&mut out, self.disk_with_cd);
        put_u64(&mut out, self.disk_entries);
        put_u64(&mut out, self.total_entries);
        put_u64(&mut out, self.cd_size);
        put_u64(&mut out, self.cd_offset);
        out
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl ZipFileEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

fn saturate_32(value: u64) -> u32 {
    if value >= ZIP64_MARKER_32 as u64 {
        ZIP64_MARKER_32
    } else {
        value as u32
    }
}

// Writes into a Vec cannot fail
fn put_u16(out: &mut Vec<u8>, value: u16) {
    let _ = out.write_u16::<LittleEndian>(value);
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    let _ = out.write_u32::<LittleEndian>(value);
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    let _ = out.write_u64::<LittleEndian>(value);
}

pub(crate) fn malformed(message: &str) -> ArchiveError {
    ArchiveError::Malformed(message.to_string())
}

pub(crate) fn truncated(_: std::io::Error) -> ArchiveError {
    malformed("truncated record")
}
