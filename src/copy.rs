//! Streaming copy with an inter-member separator.

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Separator written after each member or listed name.
///
/// An empty separator means a bare newline; otherwise the separator gets a
/// newline on each side, unless `no_newlines` asks for it verbatim.
pub fn build_separator(separator: &str, no_newlines: bool) -> String {
    if no_newlines {
        separator.to_string()
    } else if separator.is_empty() {
        "\n".to_string()
    } else {
        format!("\n{separator}\n")
    }
}

/// Copy `reader` to `writer`, then write `separator` and flush.
///
/// Returns the number of bytes written, separator included.
pub async fn copy_with_separator<R, W>(reader: &mut R, writer: &mut W, separator: &[u8]) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = io::copy(reader, writer).await?;
    writer.write_all(separator).await?;
    writer.flush().await?;
    Ok(copied + separator.len() as u64)
}
