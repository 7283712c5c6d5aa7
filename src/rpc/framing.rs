//! LSP message framing layer
//!
//! Handles message framing with Content-Length headers as specified by the
//! base protocol of the Language Server Protocol:
//!
//! Content-Length: <length>\r\n\r\n<content>

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

/// Error types for message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Stream closed mid-message: expected {expected} bytes, got {actual}")]
    IncompleteMessage { expected: usize, actual: usize },

    #[error("Invalid JSON body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Maximum message size to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Reads framed JSON messages from a byte stream.
///
/// A clean EOF on a frame boundary yields `Ok(None)`; any malformed header,
/// truncated body, oversized frame or non-JSON body is an error, and the
/// stream must not be read again afterwards.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read the next complete message from the stream.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, FramingError> {
        let content_length = match self.read_headers().await? {
            Some(length) => length,
            None => return Ok(None),
        };

        if content_length > MAX_MESSAGE_SIZE {
            return Err(FramingError::MessageTooLarge {
                size: content_length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut body = vec![0u8; content_length];
        let mut read = 0;
        while read < content_length {
            let n = self.reader.read(&mut body[read..]).await?;
            if n == 0 {
                return Err(FramingError::IncompleteMessage {
                    expected: content_length,
                    actual: read,
                });
            }
            read += n;
        }

        trace!("FrameReader: parsed complete message ({content_length} bytes)");
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Read header lines up to the blank separator, returning the
    /// Content-Length value. `Ok(None)` means EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, FramingError> {
        let mut content_length: Option<usize> = None;
        let mut first_line = true;

        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                if first_line {
                    return Ok(None);
                }
                return Err(FramingError::InvalidFormat(
                    "stream closed while reading headers".to_string(),
                ));
            }
            first_line = false;

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                return match content_length {
                    Some(length) => Ok(Some(length)),
                    None => Err(FramingError::InvalidFormat(
                        "missing Content-Length header".to_string(),
                    )),
                };
            }

            if let Some(value) = line.strip_prefix("Content-Length:") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?,
                );
            }
            // Other headers (e.g. Content-Type) are permitted and ignored.
        }
    }
}

/// Writes framed JSON messages to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { writer: inner }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Serialize and frame a message, then flush it to the stream.
    pub async fn write_frame(&mut self, message: &Value) -> Result<(), FramingError> {
        let body = serde_json::to_vec(message)?;

        trace!("FrameWriter: sending framed message ({} bytes)", body.len());

        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
