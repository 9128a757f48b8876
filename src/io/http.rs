use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ReadAt;
use anyhow::{Context, Result, anyhow, bail};

/// Tuning knobs shared by the HTTP-based backends.
#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts made for a range request failing with a timeout or connect error.
    pub max_retries: u32,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 10,
        }
    }
}

/// Archive served over HTTP(S), read with `Range` requests.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred: AtomicU64,
    attempts: u32,
}

impl HttpRangeReader {
    /// Probe `url` with default options.
    pub async fn new(url: String) -> Result<Self> {
        Self::with_options(url, HttpOptions::default()).await
    }

    /// Probe `url` with a HEAD request: the server must advertise byte
    /// ranges and report the object size.
    pub async fn with_options(url: String, options: HttpOptions) -> Result<Self> {
        let client = Client::builder().timeout(options.timeout).build()?;
        let size = probe(&client, &url).await?;
        debug!("{} is {} bytes", url, size);

        Ok(Self {
            client,
            url,
            size,
            transferred: AtomicU64::new(0),
            attempts: options.max_retries.max(1),
        })
    }

    /// Body bytes received so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One GET for `bytes=start-end`, copied into `buf`.
    async fn fetch_range(&self, start: u64, end: u64, buf: &mut [u8]) -> Result<usize> {
        let range = format!("bytes={start}-{end}");
        debug!("GET {} Range: {}", self.url, range);

        let resp = self.client.get(&self.url).header(RANGE, &range).send().await?;
        if resp.status() != StatusCode::PARTIAL_CONTENT {
            bail!("Range request {} answered with status {}", range, resp.status());
        }
        // A server may serve a different range than asked; only the start matters
        if let Some(served) = content_range_start(resp.headers().get(CONTENT_RANGE)) {
            if served != start {
                bail!("Range request {} answered from offset {}", range, served);
            }
        }

        let body = resp.bytes().await?;
        if body.is_empty() {
            bail!("Range request {} returned no data", range);
        }
        let n = body.len().min(buf.len());
        buf[..n].copy_from_slice(&body[..n]);
        self.transferred.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Timeouts and refused connections are worth another attempt.
fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .is_some_and(|e| e.is_timeout() || e.is_connect())
}

async fn probe(client: &Client, url: &str) -> Result<u64> {
    let resp = client
        .head(url)
        .send()
        .await
        .with_context(|| format!("HEAD {url} failed"))?;
    if !resp.status().is_success() {
        bail!("HEAD {} failed with status: {}", url, resp.status());
    }

    let header = |name: HeaderName| resp.headers().get(name).and_then(|v| v.to_str().ok());
    if !header(ACCEPT_RANGES).is_some_and(|v| v.contains("bytes")) {
        bail!("Remote server does not support Range requests: {}", url);
    }
    header(CONTENT_LENGTH)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| anyhow!("Remote server did not return Content-Length for {}", url))
}

/// First offset of a `Content-Range: bytes a-b/total` header.
fn content_range_start(value: Option<&HeaderValue>) -> Option<u64> {
    let value = value?.to_str().ok()?;
    let (start, _) = value.strip_prefix("bytes ")?.split_once('-')?;
    start.trim().parse().ok()
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let want = (end - offset + 1) as usize;

        let mut received = 0;
        let mut failures = 0;
        while received < want {
            let start = offset + received as u64;
            match self.fetch_range(start, end, &mut buf[received..want]).await {
                Ok(n) => received += n,
                Err(e) if is_transient(&e) => {
                    failures += 1;
                    if failures >= self.attempts {
                        bail!("Max retries exceeded for {}: {}", self.url, e);
                    }
                    warn!("Connection error, retry {}/{}: {}", failures, self.attempts, e);
                    tokio::time::sleep(Duration::from_millis(500 * failures as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn transferred_bytes(&self) -> Option<u64> {
        Some(HttpRangeReader::transferred_bytes(self))
    }
}
