use log::{debug, info};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::task::{JoinHandle, JoinSet};

use crate::copy::copy_with_separator;
use crate::error::{Error, Result};

use super::parser::ArchiveIndex;
use super::structures::Entry;

/// Upper bound on the capacity reserved up front for an in-memory entry;
/// the recorded size is untrusted.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// ZIP file extractor
///
/// Drives several [`EntryReader`](super::EntryReader) streams at once, at most
/// `jobs` of them in flight. The first error stops the remaining work.
pub struct ZipExtractor {
    index: Arc<ArchiveIndex>,
    jobs: usize,
}

impl ZipExtractor {
    pub fn new(index: Arc<ArchiveIndex>) -> Self {
        Self { index, jobs: 1 }
    }

    /// Number of entries fetched concurrently (at least 1).
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn index(&self) -> &Arc<ArchiveIndex> {
        &self.index
    }

    /// Extract file data to memory
    pub async fn extract_to_memory(&self, entry: &Entry) -> Result<Vec<u8>> {
        read_entry(&self.index, entry).await
    }

    /// Write `entries` to `out` in the given order, each followed by
    /// `separator`.
    ///
    /// With one job the entries are streamed straight through. With more,
    /// up to `jobs` entries are read ahead into memory while earlier ones are
    /// written, so output order never depends on fetch order.
    pub async fn extract_merged<W>(&self, entries: &[Entry], out: &mut W, separator: &[u8]) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0;

        if self.jobs == 1 {
            for entry in entries {
                info!("extracting: {}", entry.name);
                let mut reader = self.index.open_entry(entry).await?;
                written += copy_with_separator(&mut reader, out, separator).await?;
            }
            return Ok(written);
        }

        let mut pending = entries.iter();
        let mut window: VecDeque<(String, JoinHandle<Result<Vec<u8>>>)> = VecDeque::new();
        loop {
            while window.len() < self.jobs {
                let Some(entry) = pending.next() else { break };
                let index = Arc::clone(&self.index);
                let task_entry = entry.clone();
                let handle = tokio::spawn(async move { read_entry(&index, &task_entry).await });
                window.push_back((entry.name.clone(), handle));
            }

            let Some((name, handle)) = window.pop_front() else { break };
            let copied = match join(handle).await {
                Ok(data) => {
                    info!("extracting: {}", name);
                    copy_with_separator(&mut data.as_slice(), out, separator)
                        .await
                        .map_err(Error::from)
                }
                Err(e) => Err(e),
            };
            match copied {
                Ok(n) => written += n,
                Err(e) => {
                    // Reads already in flight must not outlive the merge
                    for (_, handle) in &window {
                        handle.abort();
                    }
                    return Err(e);
                }
            }
        }

        Ok(written)
    }

    /// Write each entry to its own file, followed by `separator`.
    ///
    /// Parent directories are created as needed; existing files are replaced.
    /// Completion order is unspecified.
    pub async fn extract_each(&self, targets: Vec<(Entry, PathBuf)>, separator: &[u8]) -> Result<()> {
        let mut pending = targets.into_iter();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < self.jobs {
                let Some((entry, path)) = pending.next() else { break };
                let index = Arc::clone(&self.index);
                let separator = separator.to_vec();
                tasks.spawn(async move { extract_to_file(&index, &entry, &path, &separator).await });
            }

            // Dropping the set on error aborts whatever is still running.
            match tasks.join_next().await {
                Some(result) => flatten(result)?,
                None => break,
            }
        }

        Ok(())
    }
}

/// Decompress a whole entry into memory.
async fn read_entry(index: &ArchiveIndex, entry: &Entry) -> Result<Vec<u8>> {
    let mut reader = index.open_entry(entry).await?;
    let mut data = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOC) as usize);
    reader.read_to_end(&mut data).await?;
    debug!("read {} ({} bytes)", entry.name, data.len());
    Ok(data)
}

/// Extract file to disk
async fn extract_to_file(index: &ArchiveIndex, entry: &Entry, output_path: &Path, separator: &[u8]) -> Result<()> {
    info!("extracting: {} -> {}", entry.name, output_path.display());

    // Create parent directories if needed
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut reader = index.open_entry(entry).await?;
    let file = fs::File::create(output_path).await?;
    let mut writer = BufWriter::new(file);
    copy_with_separator(&mut reader, &mut writer, separator).await?;
    writer.shutdown().await?;
    Ok(())
}

async fn join(handle: JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    flatten(handle.await)
}

fn flatten<T>(result: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    result.map_err(|e| Error::Source(anyhow::anyhow!("extraction task failed: {e}")))?
}
