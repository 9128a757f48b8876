//! Helper module to compute a CRC32 checksum

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use crc32fast::Hasher;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::Error;

/// Reader that validates the CRC32 when it reaches the EOF.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    check: u32,
    name: String,
    enabled: bool,
}

impl<R> Crc32Reader<R> {
    /// `name` is only used to label a mismatch.
    pub fn new(inner: R, checksum: u32, name: impl Into<String>) -> Self {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            check: checksum,
            name: name.into(),
            enabled: true,
        }
    }

    /// A reader that passes bytes through without checking them.
    pub fn unchecked(inner: R) -> Self {
        Crc32Reader {
            enabled: false,
            ..Self::new(inner, 0, String::new())
        }
    }

    fn check_matches(&self) -> Result<(), Error> {
        let actual = self.hasher.clone().finalize();
        if !self.enabled || self.check == actual {
            Ok(())
        } else {
            Err(Error::Integrity {
                name: self.name.clone(),
                expected: self.check,
                actual,
            })
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Crc32Reader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = &buf.filled()[before..];

        // Only an exhausted stream is checked.
        if read.is_empty() {
            return Poll::Ready(this.check_matches().map_err(Error::into_io));
        }
        if this.enabled {
            this.hasher.update(read);
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_empty_reader() {
        let data: &[u8] = b"";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0, "empty");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);

        let mut reader = Crc32Reader::new(data, 1, "empty");
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(matches!(
            Error::from(err),
            Error::Integrity { expected: 1, actual: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_byte_by_byte() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0x9be3e0a3, "1234");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        // Can keep reading 0 bytes after the end
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_read() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 5];

        let mut reader = Crc32Reader::new(data, 0x9be3e0a3, "1234");
        assert_eq!(reader.read(&mut buf[..0]).await.unwrap(), 0);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_mismatch_reports_entry() {
        let data: &[u8] = b"1234";
        let mut reader = Crc32Reader::new(data, 0xdeadbeef, "numbers.txt");
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        match Error::from(err) {
            Error::Integrity { name, actual, .. } => {
                assert_eq!(name, "numbers.txt");
                assert_eq!(actual, 0x9be3e0a3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchecked_ignores_checksum() {
        let data: &[u8] = b"1234";
        let mut reader = Crc32Reader::unchecked(data);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"1234");
    }
}
