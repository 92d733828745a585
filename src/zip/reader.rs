//! ZIP archive reader.
//!
//! Used to inspect archives this crate produced: list the central directory
//! and read back individual entries.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Entries that were abandoned while writing are not in the central directory
//! and are therefore never listed.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;
use flate2::Crc;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::ArchiveError;
use crate::io::ReadAt;

use super::structures::*;

type Result<T> = std::result::Result<T, ArchiveError>;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Reader for a complete ZIP archive behind any [`ReadAt`] source
pub struct ArchiveReader<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ArchiveReader<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// List every entry recorded in the central directory
    pub async fn list_entries(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > eocd_offset {
            return Err(malformed("central directory overlaps end record"));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        self.read_exact(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for _ in 0..total_entries {
            entries.push(parse_cdfh(&mut cursor)?);
        }

        Ok(entries)
    }

    /// Read an entry's uncompressed bytes, verifying its CRC-32
    pub async fn read_entry(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        let data_offset = self.data_offset(entry).await?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.read_exact(data_offset, &mut raw).await?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => {
                let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
                DeflateDecoder::new(raw.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| malformed(&format!("{}: {e}", entry.file_name)))?;
                out
            }
            CompressionMethod::Unknown(method) => {
                return Err(ArchiveError::UnsupportedMethod {
                    entry: entry.file_name.clone(),
                    method,
                });
            }
        };

        let mut crc = Crc::new();
        crc.update(&data);
        if crc.sum() != entry.crc32 {
            return Err(ArchiveError::ChecksumMismatch {
                entry: entry.file_name.clone(),
                expected: entry.crc32,
                actual: crc.sum(),
            });
        }

        Ok(data)
    }

    async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        // Common case: no archive comment, record sits at the very end
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.read_exact(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(malformed("not a valid ZIP file"));
        }
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.read_exact(search_start, &mut buf).await?;

        // Scan backwards; a candidate is real only if its comment reaches the end exactly
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(malformed("not a valid ZIP file"))
    }

    async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| malformed("missing ZIP64 locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact(locator_offset, &mut locator_buf).await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_exact(locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Offset of an entry's data, past its local header's variable fields
    async fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LocalFileHeader::SIZE];
        self.read_exact(entry.lfh_offset, &mut lfh_buf).await?;

        if &lfh_buf[0..4] != LocalFileHeader::SIGNATURE {
            return Err(malformed("invalid local file header"));
        }

        let mut cursor = Cursor::new(&lfh_buf[26..]);
        let file_name_length = cursor.read_u16::<LittleEndian>().map_err(truncated)? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(truncated)? as u64;

        Ok(entry.lfh_offset + LocalFileHeader::SIZE as u64 + file_name_length + extra_field_length)
    }

    async fn read_exact(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact_at(offset, buf)
            .await
            .map_err(ArchiveError::Read)
    }
}

/// Parse one Central Directory File Header
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig).map_err(truncated)?;
    if sig != CDFH_SIGNATURE {
        return Err(malformed("invalid central directory file header"));
    }

    let mut fixed = [0u8; CDFH_MIN_SIZE - 4];
    cursor.read_exact(&mut fixed).map_err(truncated)?;
    let mut fields = Cursor::new(&fixed[..]);

    let _version_made_by = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let _version_needed = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let _flags = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let compression_method = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let last_mod_time = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let last_mod_date = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let crc32 = fields.read_u32::<LittleEndian>().map_err(truncated)?;
    let mut compressed_size = fields.read_u32::<LittleEndian>().map_err(truncated)? as u64;
    let mut uncompressed_size = fields.read_u32::<LittleEndian>().map_err(truncated)? as u64;
    let file_name_length = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let extra_field_length = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let file_comment_length = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let _disk_number_start = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let _internal_attrs = fields.read_u16::<LittleEndian>().map_err(truncated)?;
    let _external_attrs = fields.read_u32::<LittleEndian>().map_err(truncated)?;
    let mut lfh_offset = fields.read_u32::<LittleEndian>().map_err(truncated)? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes).map_err(truncated)?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();
    let is_directory = file_name.ends_with('/');

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra).map_err(truncated)?;
    let mut extra = Cursor::new(extra.as_slice());
    while extra.position() + 4 <= extra_field_length as u64 {
        let header_id = extra.read_u16::<LittleEndian>().map_err(truncated)?;
        let field_size = extra.read_u16::<LittleEndian>().map_err(truncated)? as u64;
        let field_end = extra.position() + field_size;

        if header_id == ZIP64_EXTRA_ID {
            // Only the fields whose header value is the marker are present, in this order
            if uncompressed_size == ZIP64_MARKER_32 as u64 && extra.position() + 8 <= field_end {
                uncompressed_size = extra.read_u64::<LittleEndian>().map_err(truncated)?;
            }
            if compressed_size == ZIP64_MARKER_32 as u64 && extra.position() + 8 <= field_end {
                compressed_size = extra.read_u64::<LittleEndian>().map_err(truncated)?;
            }
            if lfh_offset == ZIP64_MARKER_32 as u64 && extra.position() + 8 <= field_end {
                lfh_offset = extra.read_u64::<LittleEndian>().map_err(truncated)?;
            }
        }
        extra.set_position(field_end);
    }

    cursor.set_position(cursor.position() + file_comment_length as u64);

    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::ArchiveWriter;

    async fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = ArchiveWriter::new(&mut out).with_store_extensions(["bin"]);
        for (name, data) in entries {
            let mut data = *data;
            writer.add_entry(name, &mut data).await.unwrap();
        }
        writer.finalize().await.unwrap();
        out
    }

    #[tokio::test]
    async fn lists_and_reads_back_written_entries() {
        let text = b"line\n".repeat(5_000);
        let bytes = build(&[
            ("a.txt", text.as_slice()),
            ("b.bin", &b"\x00\x01\x02"[..]),
            ("a.txt", &b"dup"[..]),
        ])
        .await;

        let reader = ArchiveReader::new(Arc::new(MemoryReader::new(bytes)));
        let entries = reader.list_entries().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.bin", "a-1.txt"]);

        assert_eq!(entries[0].compression_method, CompressionMethod::Deflate);
        assert!(entries[0].compressed_size < entries[0].uncompressed_size);
        assert_eq!(entries[1].compression_method, CompressionMethod::Stored);

        assert_eq!(reader.read_entry(&entries[0]).await.unwrap(), text);
        assert_eq!(reader.read_entry(&entries[1]).await.unwrap(), b"\x00\x01\x02");
        assert_eq!(reader.read_entry(&entries[2]).await.unwrap(), b"dup");
    }

    #[tokio::test]
    async fn finds_end_record_behind_a_comment() {
        let mut bytes = build(&[("a.txt", &b"hi"[..])]).await;
        let comment = b"produced elsewhere";
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        bytes.extend_from_slice(comment);

        let reader = ArchiveReader::new(Arc::new(MemoryReader::new(bytes)));
        let entries = reader.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "a.txt");
    }

    #[tokio::test]
    async fn corrupted_data_fails_checksum() {
        let mut bytes = build(&[("a.bin", &b"abcdef"[..])]).await;
        // Stored data starts right after the 30-byte header and 5-byte name
        bytes[LocalFileHeader::SIZE + 5] ^= 0xFF;

        let reader = ArchiveReader::new(Arc::new(MemoryReader::new(bytes)));
        let entries = reader.list_entries().await.unwrap();
        let err = reader.read_entry(&entries[0]).await.unwrap_err();
        assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn rejects_non_zip_input() {
        let reader = ArchiveReader::new(Arc::new(MemoryReader::new(b"definitely not a zip".to_vec())));
        assert!(matches!(
            reader.list_entries().await,
            Err(ArchiveError::Malformed(_))
        ));
    }
}
