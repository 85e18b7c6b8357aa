//! Length-prefixed message framing over a byte stream
//!
//! TCP delivers a boundary-less byte stream, so every message is written as
//! a 4-byte little-endian length followed by exactly that many payload
//! bytes. Both peers must apply the same framing; a stream that closes
//! mid-frame surfaces as `UnexpectedEof` to the read loop.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame's payload. A corrupt or hostile length
/// prefix must not drive an allocation.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Writes `payload` as one length-prefixed frame and flushes the stream.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame payload of {} bytes exceeds limit", payload.len()),
        ));
    }

    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame, blocking until the declared number of
/// payload bytes has arrived.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("declared frame length {} exceeds limit", len),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
