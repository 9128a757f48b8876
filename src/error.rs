//! Error types and the related `Result<T>`

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The storage backend failed to deliver bytes (network, filesystem).
    #[error("source I/O failed: {0:#}")]
    Source(#[source] anyhow::Error),

    /// The archive structures are missing, truncated or inconsistent.
    #[error("corrupt archive: {0}")]
    ArchiveCorrupt(String),

    /// The archive relies on something this reader does not implement
    /// (encryption, multi-disk layouts, unknown compression methods).
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Decompressed content did not match the checksum recorded in the archive.
    #[error("CRC32 mismatch for {name}: expected {expected:#010x}, got {actual:#010x}")]
    Integrity {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// A requested member or location scheme has no match.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::ArchiveCorrupt(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedFeature(msg.into())
    }

    /// Wrap this error so it can travel through an `AsyncRead` implementation.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match self {
            Error::ArchiveCorrupt(_) | Error::Integrity { .. } => io::ErrorKind::InvalidData,
            Error::UnsupportedFeature(_) => io::ErrorKind::Unsupported,
            Error::NotFound(_) => io::ErrorKind::NotFound,
            Error::Source(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

impl From<io::Error> for Error {
    /// Recovers an engine error that was boxed into an `io::Error` by a stream,
    /// otherwise treats the failure as a source error.
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Source(err.into());
        }
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::Source(anyhow::anyhow!(other)),
            None => Error::Source(anyhow::anyhow!("I/O error without detail")),
        }
    }
}
