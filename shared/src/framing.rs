//! Length-delimited framing over async streams.
//!
//! A frame is a 4-byte big-endian length followed by that many payload bytes
//! (see [`crate::codec`] for the payload layout). Declared lengths above the
//! reader's limit are rejected before any buffer is allocated.

use crate::codec;
use crate::error::{FrameError, ProtocolError};
use crate::message::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound on a frame payload (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Encodes a message and prefixes it with its length.
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let payload = codec::encode(message);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Validates a frame header against `max_len` and returns the payload length.
pub fn parse_header(header: [u8; FRAME_HEADER_LEN], max_len: usize) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }
    Ok(len)
}

/// Reads a frame header.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary. A
/// stream that ends part-way through the header is a truncated frame.
pub async fn read_header<R>(reader: &mut R, max_len: usize) -> Result<Option<usize>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::TruncatedFrame {
                declared: FRAME_HEADER_LEN,
                received: filled,
            }
            .into());
        }
        filled += n;
    }
    Ok(Some(parse_header(header, max_len)?))
}

/// Reads exactly `len` payload bytes.
pub async fn read_body<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut body = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut body[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::TruncatedFrame {
                declared: len,
                received: filled,
            }
            .into());
        }
        filled += n;
    }
    Ok(body)
}

/// Reads and decodes one frame. `Ok(None)` on clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Message>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let Some(len) = read_header(reader, max_len).await? else {
        return Ok(None);
    };
    let body = read_body(reader, len).await?;
    Ok(Some(codec::decode(&body)?))
}

/// Writes an already encoded frame and flushes it.
pub async fn write_raw<W>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_raw(writer, &encode_frame(message)).await
}
