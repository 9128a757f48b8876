//! Hand-rolled archive writer for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use zipspy::{MemorySource, ReadAt};

// 2024-05-17 10:30:00
const DOS_TIME: u16 = (10 << 11) | (30 << 5);
const DOS_DATE: u16 = (44 << 9) | (5 << 5) | 17;

struct PendingEntry {
    name: String,
    data: Vec<u8>,
    method: u16,
    crc: Option<u32>,
    flags: u16,
}

/// Byte positions of the structures in a built archive (without prefix).
#[derive(Debug, Default)]
pub struct Layout {
    pub local_headers: Vec<usize>,
    pub central_headers: Vec<usize>,
    pub cd_offset: usize,
    pub cd_size: usize,
    pub eocd_offset: usize,
}

#[derive(Default)]
pub struct ArchiveBuilder {
    prefix: Vec<u8>,
    entries: Vec<PendingEntry>,
    comment: Vec<u8>,
    zip64: bool,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unrelated bytes placed in front of the archive; recorded offsets are
    /// left relative to the archive start, as with `cat stub archive.zip`.
    pub fn prefix(mut self, bytes: &[u8]) -> Self {
        self.prefix = bytes.to_vec();
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Write ZIP64 end records and saturate every 32-bit field.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, 0)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, 8)
    }

    pub fn directory(self, name: &str) -> Self {
        assert!(name.ends_with('/'));
        self.entry(name, b"", 0)
    }

    /// Entry with an arbitrary method code; `data` is stored as given.
    pub fn entry(mut self, name: &str, data: &[u8], method: u16) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            data: data.to_vec(),
            method,
            crc: None,
            flags: 0,
        });
        self
    }

    /// Record a wrong checksum for the last entry.
    pub fn with_crc(mut self, crc: u32) -> Self {
        self.entries.last_mut().expect("no entry").crc = Some(crc);
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.entries.last_mut().expect("no entry").flags = flags;
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(self) -> (Vec<u8>, Layout) {
        let mut out = Vec::new();
        let mut layout = Layout::default();
        let mut records = Vec::new();

        for entry in &self.entries {
            let crc = entry.crc.unwrap_or_else(|| crc32fast::hash(&entry.data));
            let payload = if entry.method == 8 {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&entry.data).unwrap();
                encoder.finish().unwrap()
            } else {
                entry.data.clone()
            };
            let offset = out.len();
            layout.local_headers.push(offset);

            let (csize32, usize32) = if self.zip64 {
                (u32::MAX, u32::MAX)
            } else {
                (payload.len() as u32, entry.data.len() as u32)
            };
            let mut local_extra = Vec::new();
            if self.zip64 {
                local_extra.extend_from_slice(&1u16.to_le_bytes());
                local_extra.extend_from_slice(&16u16.to_le_bytes());
                local_extra.extend_from_slice(&(entry.data.len() as u64).to_le_bytes());
                local_extra.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            }

            out.extend_from_slice(b"PK\x03\x04");
            put16(&mut out, if self.zip64 { 45 } else { 20 });
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, DOS_TIME);
            put16(&mut out, DOS_DATE);
            put32(&mut out, crc);
            put32(&mut out, csize32);
            put32(&mut out, usize32);
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, local_extra.len() as u16);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&local_extra);
            out.extend_from_slice(&payload);

            records.push((crc, payload.len(), offset));
        }

        layout.cd_offset = out.len();
        for (entry, (crc, compressed_len, offset)) in self.entries.iter().zip(records) {
            layout.central_headers.push(out.len());

            // An extended timestamp block the reader has to skip
            let mut extra = Vec::new();
            extra.extend_from_slice(&0x5455u16.to_le_bytes());
            extra.extend_from_slice(&5u16.to_le_bytes());
            extra.push(1);
            extra.extend_from_slice(&1_715_941_800u32.to_le_bytes());

            let (csize32, usize32, offset32) = if self.zip64 {
                extra.extend_from_slice(&1u16.to_le_bytes());
                extra.extend_from_slice(&24u16.to_le_bytes());
                extra.extend_from_slice(&(entry.data.len() as u64).to_le_bytes());
                extra.extend_from_slice(&(compressed_len as u64).to_le_bytes());
                extra.extend_from_slice(&(offset as u64).to_le_bytes());
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (compressed_len as u32, entry.data.len() as u32, offset as u32)
            };

            out.extend_from_slice(b"PK\x01\x02");
            put16(&mut out, 0x031E);
            put16(&mut out, if self.zip64 { 45 } else { 20 });
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, DOS_TIME);
            put16(&mut out, DOS_DATE);
            put32(&mut out, crc);
            put32(&mut out, csize32);
            put32(&mut out, usize32);
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, extra.len() as u16);
            put16(&mut out, 0); // comment
            put16(&mut out, 0); // disk
            put16(&mut out, 0); // internal attributes
            put32(&mut out, 0); // external attributes
            put32(&mut out, offset32);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&extra);
        }
        layout.cd_size = out.len() - layout.cd_offset;

        let count = self.entries.len();
        if self.zip64 {
            let record_offset = out.len();
            out.extend_from_slice(b"PK\x06\x06");
            put64(&mut out, 44);
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            put64(&mut out, count as u64);
            put64(&mut out, count as u64);
            put64(&mut out, layout.cd_size as u64);
            put64(&mut out, layout.cd_offset as u64);

            out.extend_from_slice(b"PK\x06\x07");
            put32(&mut out, 0);
            put64(&mut out, record_offset as u64);
            put32(&mut out, 1);
        }

        layout.eocd_offset = out.len();
        out.extend_from_slice(b"PK\x05\x06");
        put16(&mut out, 0);
        put16(&mut out, 0);
        let (count16, size32, offset32) = if self.zip64 {
            (u16::MAX, u32::MAX, u32::MAX)
        } else {
            (count as u16, layout.cd_size as u32, layout.cd_offset as u32)
        };
        put16(&mut out, count16);
        put16(&mut out, count16);
        put32(&mut out, size32);
        put32(&mut out, offset32);
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);

        let mut archive = self.prefix;
        archive.extend_from_slice(&out);
        (archive, layout)
    }
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Source that records every positioned read.
pub struct CountingSource {
    inner: MemorySource,
    reads: AtomicUsize,
    ranges: Mutex<Vec<(u64, usize)>>,
}

impl CountingSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: MemorySource::new(data),
            reads: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn ranges(&self) -> Vec<(u64, usize)> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadAt for CountingSource {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.ranges.lock().unwrap().push((offset, buf.len()));
        self.inner.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

/// Source that hands out at most `max` bytes per read.
pub struct TrickleSource {
    inner: MemorySource,
    max: usize,
}

impl TrickleSource {
    pub fn new(data: Vec<u8>, max: usize) -> Self {
        Self {
            inner: MemorySource::new(data),
            max,
        }
    }
}

#[async_trait]
impl ReadAt for TrickleSource {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        let len = buf.len().min(self.max);
        self.inner.read_at(offset, &mut buf[..len]).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

/// Source whose reads at or past `from` hang once `stall` has been called.
pub struct StallingSource {
    inner: MemorySource,
    from: u64,
    stalled: AtomicBool,
}

impl StallingSource {
    pub fn new(data: Vec<u8>, from: u64) -> Self {
        Self {
            inner: MemorySource::new(data),
            from,
            stalled: AtomicBool::new(false),
        }
    }

    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReadAt for StallingSource {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        if offset >= self.from && self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}
