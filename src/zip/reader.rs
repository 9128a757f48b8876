//! Lazily fetched, decompressing streams over single entries.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::{Decompress, FlushDecompress, Status};
use log::debug;
use std::future::Future;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};

use crate::error::{Error, Result};
use crate::io::{ReadAt, read_full_at};

use super::crc_reader::Crc32Reader;
use super::parser::ArchiveIndex;
use super::structures::{CompressionMethod, Entry, LFH_SIGNATURE, LFH_SIZE};

/// Largest positioned read issued while streaming entry data.
const CHUNK_SIZE: usize = 64 * 1024;

type ChunkFuture = Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + Send>>;

async fn fetch(source: Arc<dyn ReadAt>, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; len];
    read_full_at(&*source, offset, &mut chunk)
        .await
        .map_err(Error::into_io)?;
    Ok(chunk)
}

/// Sequential reader over `[start, end)` of a source.
///
/// Nothing is read up front; each time the buffered chunk runs dry the next
/// chunk of at most 64 KiB is requested.
pub struct RangeReader {
    source: Arc<dyn ReadAt>,
    next: u64,
    end: u64,
    chunk: Vec<u8>,
    pos: usize,
    pending: Option<ChunkFuture>,
}

impl RangeReader {
    pub fn new(source: Arc<dyn ReadAt>, start: u64, end: u64) -> Self {
        Self {
            source,
            next: start,
            end: end.max(start),
            chunk: Vec::new(),
            pos: 0,
            pending: None,
        }
    }

    /// Bytes not yet handed out, buffered or not.
    pub fn remaining(&self) -> u64 {
        (self.end - self.next) + (self.chunk.len() - self.pos) as u64
    }
}

impl AsyncBufRead for RangeReader {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        while this.pos >= this.chunk.len() {
            if this.pending.is_none() && this.next >= this.end {
                return Poll::Ready(Ok(&[]));
            }
            let len = (this.end - this.next).min(CHUNK_SIZE as u64) as usize;
            let fut = this
                .pending
                .get_or_insert_with(|| Box::pin(fetch(Arc::clone(&this.source), this.next, len)));
            let chunk = ready!(fut.as_mut().poll(cx));
            this.pending = None;
            let chunk = chunk?;
            this.next += chunk.len() as u64;
            this.chunk = chunk;
            this.pos = 0;
        }
        Poll::Ready(Ok(&this.chunk[this.pos..]))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        this.pos = (this.pos + amt).min(this.chunk.len());
    }
}

impl AsyncRead for RangeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let available = ready!(self.as_mut().poll_fill_buf(cx))?;
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        self.consume(n);
        Poll::Ready(Ok(()))
    }
}

/// Raw DEFLATE decoder over a buffered compressed stream.
pub struct Inflater<R> {
    inner: R,
    decompress: Decompress,
    done: bool,
}

impl<R> Inflater<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            // ZIP stores raw deflate data, without zlib framing
            decompress: Decompress::new(false),
            done: false,
        }
    }
}

impl<R: AsyncBufRead + Unpin> AsyncRead for Inflater<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.done || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            let input = ready!(Pin::new(&mut this.inner).poll_fill_buf(cx))?;
            let eof = input.is_empty();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let before_in = this.decompress.total_in();
            let before_out = this.decompress.total_out();
            let status = this
                .decompress
                .decompress(input, buf.initialize_unfilled(), flush)
                .map_err(|e| Error::corrupt(format!("invalid deflate data: {e}")).into_io())?;
            let consumed = (this.decompress.total_in() - before_in) as usize;
            let produced = (this.decompress.total_out() - before_out) as usize;

            Pin::new(&mut this.inner).consume(consumed);
            buf.advance(produced);

            match status {
                Status::StreamEnd => {
                    this.done = true;
                    return Poll::Ready(Ok(()));
                }
                _ if produced > 0 => return Poll::Ready(Ok(())),
                _ if eof => {
                    return Poll::Ready(Err(
                        Error::corrupt("deflate data ends before the end of stream marker").into_io(),
                    ));
                }
                _ if consumed == 0 => {
                    return Poll::Ready(Err(
                        Error::corrupt("deflate decoder made no progress").into_io()
                    ));
                }
                _ => {}
            }
        }
    }
}

enum Decoder {
    Stored(RangeReader),
    Deflated(Inflater<RangeReader>),
}

impl AsyncRead for Decoder {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Decoder::Stored(r) => Pin::new(r).poll_read(cx, buf),
            Decoder::Deflated(r) => Pin::new(r).poll_read(cx, buf),
        }
    }
}

/// Forward-only stream of one entry's decompressed bytes.
///
/// Compressed data is fetched lazily as the stream is polled. When CRC
/// checking is enabled, reaching the end of a stream whose checksum does not
/// match fails with [`Error::Integrity`] (boxed in the `io::Error`; convert it
/// back with `Error::from`).
pub struct EntryReader {
    inner: Crc32Reader<Decoder>,
    name: String,
}

impl EntryReader {
    /// Read the local header of `entry` and set up a stream over its data.
    ///
    /// `data_limit` is the offset the entry data must not run past (the start
    /// of the central directory). Directories get an empty stream and no read.
    pub async fn open(
        source: Arc<dyn ReadAt>,
        entry: &Entry,
        data_limit: u64,
        verify_crc: bool,
    ) -> Result<Self> {
        if entry.is_directory {
            return Ok(Self {
                inner: Crc32Reader::unchecked(Decoder::Stored(RangeReader::new(source, 0, 0))),
                name: entry.name.clone(),
            });
        }

        let inflate = match entry.compression_method {
            CompressionMethod::Stored => false,
            CompressionMethod::Deflated => true,
            CompressionMethod::Unsupported(method) => {
                return Err(Error::unsupported(format!(
                    "{}: compression method {}",
                    entry.name, method
                )));
            }
        };
        if entry.is_encrypted() {
            return Err(Error::unsupported(format!("{}: encrypted entry", entry.name)));
        }

        // Read the Local File Header
        let mut lfh_buf = [0u8; LFH_SIZE];
        read_full_at(&*source, entry.local_header_offset, &mut lfh_buf).await?;

        // Verify LFH signature (PK\x03\x04)
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::corrupt(format!(
                "{}: bad local file header signature at offset {}",
                entry.name, entry.local_header_offset
            )));
        }

        // The name and extra field may differ from the central directory copy
        let mut cursor = Cursor::new(&lfh_buf[26..]);
        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        let data_start =
            entry.local_header_offset + LFH_SIZE as u64 + file_name_length + extra_field_length;
        let data_end = data_start
            .checked_add(entry.compressed_size)
            .filter(|end| *end <= data_limit)
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "{}: {} bytes of data at offset {} run into the central directory",
                    entry.name, entry.compressed_size, data_start
                ))
            })?;
        debug!(
            "opening {} ({:?}): data at [{}, {})",
            entry.name, entry.compression_method, data_start, data_end
        );

        let range = RangeReader::new(source, data_start, data_end);
        let decoder = if inflate {
            Decoder::Deflated(Inflater::new(range))
        } else {
            Decoder::Stored(range)
        };
        let inner = if verify_crc {
            Crc32Reader::new(decoder, entry.crc32, entry.name.clone())
        } else {
            Crc32Reader::unchecked(decoder)
        };

        Ok(Self {
            inner,
            name: entry.name.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsyncRead for EntryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl ArchiveIndex {
    /// Open a decompressing stream over `entry`.
    ///
    /// `entry` should come from this index. Directory entries yield an empty
    /// stream without touching the source.
    pub async fn open_entry(&self, entry: &Entry) -> Result<EntryReader> {
        EntryReader::open(
            Arc::clone(self.source()),
            entry,
            self.central_directory_offset(),
            self.verifies_crc(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    fn source(data: Vec<u8>) -> Arc<dyn ReadAt> {
        Arc::new(MemorySource::new(data))
    }

    #[tokio::test]
    async fn range_reader_respects_bounds() {
        let data: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
        let mut reader = RangeReader::new(source(data.clone()), 10, 150_010);
        assert_eq!(reader.remaining(), 150_000);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, &data[10..150_010]);
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn range_reader_past_end_of_source_is_corrupt() {
        let mut reader = RangeReader::new(source(vec![1, 2, 3]), 0, 10);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(Error::from(err), Error::ArchiveCorrupt(_)));
    }

    #[tokio::test]
    async fn inflater_round_trips_deflate() {
        let plain: Vec<u8> = b"the quick brown fox jumps over the lazy dog\n"
            .iter()
            .copied()
            .cycle()
            .take(300_000)
            .collect();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();
        let len = compressed.len() as u64;

        let mut inflater = Inflater::new(RangeReader::new(source(compressed), 0, len));
        let mut out = Vec::new();
        inflater.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, plain);
    }

    #[tokio::test]
    async fn inflater_rejects_truncated_data() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[7u8; 10_000]).unwrap();
        let mut compressed = encoder.finish().unwrap();
        compressed.truncate(compressed.len() / 2);
        let len = compressed.len() as u64;

        let mut inflater = Inflater::new(RangeReader::new(source(compressed), 0, len));
        let mut out = Vec::new();
        let err = inflater.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(Error::from(err), Error::ArchiveCorrupt(_)));
    }
}
