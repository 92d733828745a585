//! Streaming ZIP writer.
//!
//! Entries are appended strictly one after another: a local header, the
//! (optionally deflated) data read chunk by chunk from the source, then a data
//! descriptor carrying CRC and sizes. Nothing about an entry has to be known
//! before its bytes arrive, so arbitrarily large sources stream through a
//! fixed-size buffer. [`ArchiveWriter::finalize`] appends the central
//! directory and end records.

use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use std::collections::HashSet;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ArchiveError;

use super::structures::*;

type Result<T> = std::result::Result<T, ArchiveError>;

/// Bytes read from a source per compression step
const CHUNK_SIZE: usize = 64 * 1024;

/// What happened to one [`ArchiveWriter::add_entry`] call
#[derive(Debug)]
pub enum EntryStatus {
    /// The entry is complete and listed in the central directory
    Written {
        /// Final, unique entry name
        name: String,
        /// Uncompressed size in bytes
        size: u64,
    },
    /// The source failed mid-way; its bytes stay in the stream but the entry is
    /// left out of the central directory, so readers never see it
    Abandoned {
        /// Name the entry was going to use
        name: String,
        /// Why the source stopped
        reason: String,
    },
}

/// Totals reported once the archive is finalized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Entries listed in the central directory
    pub entries: usize,
    /// Bytes written to the output, trailer included
    pub bytes_written: u64,
}

/// Single-writer, append-only ZIP encoder over any async byte sink
pub struct ArchiveWriter<W> {
    out: W,
    offset: u64,
    names: EntryNames,
    central: Vec<CentralDirectoryHeader>,
    level: u32,
    store_extensions: Vec<String>,
}

impl<W: AsyncWrite + Unpin + Send> ArchiveWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            offset: 0,
            names: EntryNames::default(),
            central: Vec::new(),
            level: 6,
            store_extensions: Vec::new(),
        }
    }

    /// Deflate level 0-9; level 0 stores entries uncompressed
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    /// Extensions (case-insensitive, without the dot) written uncompressed
    pub fn with_store_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Append one entry, reading `content` until EOF
    ///
    /// A name already used in this archive gets `-1`, `-2`, ... inserted before
    /// its extension. Errors reading `content` abandon the entry and are
    /// reported in the returned status; only failures writing the output are
    /// returned as `Err`, and they leave the archive unusable.
    pub async fn add_entry<R>(&mut self, requested_name: &str, content: &mut R) -> Result<EntryStatus>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let name = self.names.claim(requested_name);
        let method = self.method_for(&name);
        let modified = DosDateTime::now();
        let flags = FLAG_DATA_DESCRIPTOR | FLAG_UTF8;
        let lfh_offset = self.offset;

        let header = LocalFileHeader {
            version_needed: VERSION_DEFLATE,
            flags,
            method,
            modified,
            file_name: &name,
        };
        self.write(&header.to_bytes()).await?;

        let copied = match method {
            CompressionMethod::Deflate => self.copy_deflated(&name, content).await?,
            _ => self.copy_stored(content).await?,
        };

        let descriptor = DataDescriptor {
            crc32: copied.crc32,
            compressed_size: copied.compressed,
            uncompressed_size: copied.uncompressed,
        };
        self.write(&descriptor.to_bytes()).await?;

        if let Some(error) = copied.interrupted {
            self.names.release(&name);
            tracing::warn!(entry = %name, error = %error, "source failed mid-entry, entry dropped");
            return Ok(EntryStatus::Abandoned {
                name,
                reason: error.to_string(),
            });
        }

        tracing::debug!(
            entry = %name,
            size = copied.uncompressed,
            compressed = copied.compressed,
            "entry written"
        );
        self.central.push(CentralDirectoryHeader {
            file_name: name.clone(),
            flags,
            method,
            modified,
            crc32: copied.crc32,
            compressed_size: copied.compressed,
            uncompressed_size: copied.uncompressed,
            lfh_offset,
        });

        Ok(EntryStatus::Written {
            name,
            size: copied.uncompressed,
        })
    }

    /// Write the central directory and end records, then shut the output down
    pub async fn finalize(mut self) -> Result<ArchiveSummary> {
        let central = std::mem::take(&mut self.central);
        let cd_offset = self.offset;
        for header in &central {
            self.write(&header.to_bytes()).await?;
        }
        let cd_size = self.offset - cd_offset;
        let entries = central.len() as u64;

        let eocd = EndOfCentralDirectory::for_directory(entries, cd_size, cd_offset);
        if eocd.is_zip64() {
            let eocd64_offset = self.offset;
            self.write(&Zip64EOCD::for_directory(entries, cd_size, cd_offset).to_bytes())
                .await?;
            let locator = Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            };
            self.write(&locator.to_bytes()).await?;
        }
        self.write(&eocd.to_bytes()).await?;

        self.out.flush().await.map_err(ArchiveError::Write)?;
        self.out.shutdown().await.map_err(ArchiveError::Write)?;

        Ok(ArchiveSummary {
            entries: central.len(),
            bytes_written: self.offset,
        })
    }

    fn method_for(&self, name: &str) -> CompressionMethod {
        if self.level == 0 {
            return CompressionMethod::Stored;
        }
        let extension = match split_extension(name).1.strip_prefix('.') {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return CompressionMethod::Deflate,
        };
        if self.store_extensions.contains(&extension) {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        }
    }

    async fn copy_stored<R>(&mut self, content: &mut R) -> Result<Copied>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut crc = Crc::new();
        let mut total: u64 = 0;
        let mut interrupted = None;
        loop {
            let n = match content.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    interrupted = Some(e);
                    break;
                }
            };
            crc.update(&buf[..n]);
            self.write(&buf[..n]).await?;
            total += n as u64;
        }

        Ok(Copied {
            crc32: crc.sum(),
            compressed: total,
            uncompressed: total,
            interrupted,
        })
    }

    async fn copy_deflated<R>(&mut self, entry: &str, content: &mut R) -> Result<Copied>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut compress = Compress::new(Compression::new(self.level), false);
        let mut input = vec![0u8; CHUNK_SIZE];
        let mut output = Vec::with_capacity(CHUNK_SIZE);
        let mut crc = Crc::new();
        let mut interrupted = None;

        loop {
            // A failed read still closes the deflate stream so framing stays valid
            let n = match content.read(&mut input).await {
                Ok(n) => n,
                Err(e) => {
                    interrupted = Some(e);
                    0
                }
            };
            crc.update(&input[..n]);
            let finish = n == 0;
            self.deflate(entry, &mut compress, &input[..n], &mut output, finish)
                .await?;
            if finish {
                break;
            }
        }

        Ok(Copied {
            crc32: crc.sum(),
            compressed: compress.total_out(),
            uncompressed: compress.total_in(),
            interrupted,
        })
    }

    async fn deflate(
        &mut self,
        entry: &str,
        compress: &mut Compress,
        mut input: &[u8],
        output: &mut Vec<u8>,
        finish: bool,
    ) -> Result<()> {
        let flush = if finish {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };

        loop {
            output.clear();
            let before = compress.total_in();
            let status = compress
                .compress_vec(input, output, flush)
                .map_err(|e| ArchiveError::Compression {
                    entry: entry.to_string(),
                    reason: e.to_string(),
                })?;
            let consumed = (compress.total_in() - before) as usize;
            input = &input[consumed..];

            if !output.is_empty() {
                self.write(output).await?;
            }

            match status {
                Status::StreamEnd => return Ok(()),
                // Without Finish, stop once input is gone and the encoder had room to spare
                _ if !finish && input.is_empty() && output.len() < output.capacity() => {
                    return Ok(());
                }
                Status::BufError if consumed == 0 && output.is_empty() => {
                    return Err(ArchiveError::Compression {
                        entry: entry.to_string(),
                        reason: "encoder made no progress".to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .await
            .map_err(ArchiveError::Write)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

struct Copied {
    crc32: u32,
    compressed: u64,
    uncompressed: u64,
    interrupted: Option<io::Error>,
}

/// Names already used in one archive
#[derive(Debug, Default)]
struct EntryNames {
    taken: HashSet<String>,
}

impl EntryNames {
    /// Reserve `requested`, or the first free `stem-N.ext` variant of it
    fn claim(&mut self, requested: &str) -> String {
        if self.taken.insert(requested.to_string()) {
            return requested.to_string();
        }

        let (stem, extension) = split_extension(requested);
        let mut n: u64 = 1;
        loop {
            let candidate = format!("{stem}-{n}{extension}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    fn release(&mut self, name: &str) {
        self.taken.remove(name);
    }
}

/// Split `report.final.pdf` into (`report.final`, `.pdf`); dotfiles have no extension
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}
