//! Newline-delimited JSON framing
//!
//! Wire format: [compact JSON][\n]
//! There is no length prefix. serde_json escapes newlines inside strings, so a
//! serialized message never contains a raw `\n`.
//!
//! Two read paths exist. [`read_line`] pulls one byte at a time and is only
//! used for command replies, before the receiver task owns the socket, so it
//! never consumes bytes past the reply. [`LineFramer`] accumulates arbitrary
//! chunks for the receiver task.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::error::{Error, Result};

/// Maximum accepted line length (1MB, sanity limit)
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Serialize `msg` compactly and write it followed by a single newline.
///
/// Returns the number of bytes put on the wire, terminator included.
pub async fn write_line<W, T>(writer: &mut W, msg: &T, debug: bool) -> Result<usize>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut payload = serde_json::to_vec(msg)
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

    if debug {
        info!(target: "mpapi_net::wire", "TX: {}", String::from_utf8_lossy(&payload));
    }

    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;

    Ok(payload.len())
}

/// Read exactly one line, blocking byte by byte until `\n`.
///
/// The terminator is not included in the result.
pub async fn read_line<R>(reader: &mut R, debug: bool) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(256);

    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_LINE_LEN {
            return Err(line_too_long());
        }
        line.push(byte);
    }

    if debug {
        info!(target: "mpapi_net::wire", "RX: {}", String::from_utf8_lossy(&line));
    }

    Ok(line)
}

fn line_too_long() -> Error {
    Error::Protocol(format!("Line too long: more than {} bytes", MAX_LINE_LEN))
}

/// Splits a byte stream into lines.
///
/// Feed it whatever a socket read returned; it hands back every line the
/// chunk completed and keeps the unterminated tail for the next call.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and drain all complete lines. Empty lines are discarded.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            if self.pending.len() + pos > MAX_LINE_LEN {
                self.pending.clear();
                return Err(line_too_long());
            }
            self.pending.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            if !self.pending.is_empty() {
                lines.push(std::mem::take(&mut self.pending));
            }
        }

        self.pending.extend_from_slice(rest);
        if self.pending.len() > MAX_LINE_LEN {
            self.pending.clear();
            return Err(line_too_long());
        }

        Ok(lines)
    }

    /// Bytes buffered for a line that has not been terminated yet
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
