//! LSP header framing.
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

const CONTENT_LENGTH: &str = "content-length";

/// Largest message body accepted from a server (64 MiB).
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, message: &Value) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// Returns `Ok(None)` when the stream ends before any header byte.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(length) = read_headers(reader).await? else {
        return Ok(None);
    };
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

async fn read_headers<R>(reader: &mut R) -> Result<Option<usize>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut first = true;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if first {
                return Ok(None);
            }
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed while reading headers",
            )));
        }
        first = false;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        // Other headers (Content-Type) are ignored
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| TransportError::InvalidHeader(trimmed.to_string()))?;
                if length > MAX_CONTENT_LENGTH {
                    return Err(TransportError::InvalidHeader(trimmed.to_string()));
                }
                content_length = Some(length);
            }
        }
    }

    content_length
        .map(Some)
        .ok_or(TransportError::MissingContentLength)
}
