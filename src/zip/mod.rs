//! ZIP archive indexing and entry extraction.
//!
//! This module reads ZIP archives from any [`ReadAt`](crate::io::ReadAt)
//! source using only the positioned reads it needs, which is what makes
//! remote archives practical.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk record layouts and the [`Entry`] model
//! - [`parser`]: builds the [`ArchiveIndex`] from the end records and the
//!   central directory
//! - [`locator`]: exact-name and pattern lookups over the index
//! - [`reader`]: lazily fetched, decompressing [`EntryReader`] streams
//! - [`extractor`]: concurrent extraction of several entries into one or
//!   more destinations
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is found by searching backwards from the end of the source, so
//! archives with data prepended to them (self-extractors) parse too.
//!
//! ## Supported Features
//!
//! - ZIP64 extensions for archives and entries over 4GB
//! - STORED (no compression) and DEFLATE methods
//! - CRC32 verification of extracted content
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods
//! - Read only

mod crc_reader;
pub mod extractor;
pub mod locator;
pub mod parser;
pub mod reader;
pub mod structures;

pub use crc_reader::Crc32Reader;
pub use extractor::ZipExtractor;
pub use locator::missing_names;
pub use parser::ArchiveIndex;
pub use reader::EntryReader;
pub use structures::{CompressionMethod, Entry};
