//! Random access data sources.
//!
//! Everything the archive engine needs from storage is the [`ReadAt`] trait:
//! a total size and positioned reads. Each backend keeps its own concerns
//! (credentials, retries, transfer accounting) to itself.

mod http;
mod local;
mod memory;
mod registry;
mod s3;

pub use http::{HttpOptions, HttpRangeReader};
pub use local::LocalFileReader;
pub use memory::MemorySource;
pub use registry::{SourceFactory, SourceRegistry};
pub use s3::{S3Location, S3RangeReader};

use anyhow::Result;
use async_trait::async_trait;
use log::trace;

use crate::error::Error;

/// Trait for random access reading from a data source
///
/// Implementations must tolerate concurrent calls: every call is a
/// self-contained positioned read with no shared cursor.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read. A short count is only allowed at the
    /// end of the data; `Ok(0)` means `offset` is at or past the end.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Bytes pulled over the network so far, for backends that track it.
    fn transferred_bytes(&self) -> Option<u64> {
        None
    }
}

/// Fill `buf` completely from `offset`, issuing more reads if the source
/// returns short counts.
///
/// Running out of data before the buffer is full means the archive is
/// truncated, so that case is reported as [`Error::ArchiveCorrupt`].
pub(crate) async fn read_full_at<R>(source: &R, offset: u64, buf: &mut [u8]) -> crate::Result<()>
where
    R: ReadAt + ?Sized,
{
    trace!("read {} bytes at offset {}", buf.len(), offset);
    let mut filled = 0;
    while filled < buf.len() {
        let n = source
            .read_at(offset + filled as u64, &mut buf[filled..])
            .await
            .map_err(Error::Source)?;
        if n == 0 {
            return Err(Error::corrupt(format!(
                "unexpected end of data: wanted {} bytes at offset {}, got {}",
                buf.len(),
                offset,
                filled
            )));
        }
        filled += n;
    }
    Ok(())
}
