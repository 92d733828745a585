//! ZIP container encoding and inspection.
//!
//! ## Architecture
//!
//! - [`structures`]: records of the ZIP format (headers, descriptors, end records)
//!   and their byte layout
//! - [`writer`]: the streaming [`ArchiveWriter`] that archive jobs feed
//! - [`reader`]: [`ArchiveReader`] for listing and reading back finished archives
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Because the central directory comes last, an archive can be produced in a
//! single forward pass: each entry's CRC and sizes go into a data descriptor
//! right after its data, and the directory is written once all entries are in.
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE compression methods
//! - ZIP64 sizes, offsets and entry counts
//! - UTF-8 entry names
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

mod reader;
mod structures;
mod writer;

pub use reader::ArchiveReader;
pub use structures::*;
pub use writer::{ArchiveSummary, ArchiveWriter, EntryStatus};
