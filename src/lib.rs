//! # zipspy
//!
//! Read individual members of ZIP archives that live somewhere else, without
//! downloading the whole archive.
//!
//! The archive is reached through a [`ReadAt`] source offering positioned
//! reads (local files, HTTP servers supporting Range requests, S3-compatible
//! object storage). Indexing reads only the end of the archive and its
//! central directory; each extracted member then costs one small header read
//! plus its own compressed bytes, fetched lazily as the stream is consumed.
//!
//! ## Features
//!
//! - `file://`, `http(s)://` and `s3://` locations through a [`SourceRegistry`]
//! - ZIP64 archives and archives with data prepended to them
//! - STORED and DEFLATE members, CRC32-verified
//! - Exact-name and regular-expression lookups
//! - Concurrent extraction with ordered output
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::io::AsyncReadExt;
//! use zipspy::{ArchiveIndex, HttpRangeReader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(HttpRangeReader::new("https://example.com/archive.zip".to_string()).await?);
//!     let index = ArchiveIndex::open(reader).await?;
//!
//!     for entry in index.all_entries() {
//!         println!("{}", entry.name);
//!     }
//!
//!     let entry = index.find("docs/readme.txt")?;
//!     let mut contents = String::new();
//!     index.open_entry(entry).await?.read_to_string(&mut contents).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod copy;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{HttpRangeReader, LocalFileReader, MemorySource, ReadAt, S3RangeReader, SourceRegistry};
pub use zip::{ArchiveIndex, CompressionMethod, Entry, EntryReader, ZipExtractor};
