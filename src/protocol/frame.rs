//! Tagged, length-prefixed frames for the vsock side channel
//!
//! Wire format:
//!   [4-byte ASCII tag][4-byte length (little-endian)][payload]
//!
//! The length always equals the payload size. A frame that cannot be read
//! in full means the stream is out of sync; the connection must be dropped.

use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Size of the fixed frame header
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted from a peer
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Four-byte message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// Handshake: guest asks for its command, host answers with it
    pub const HELO: Tag = Tag(*b"HELO");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: Tag,
    pub length: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(self.tag.as_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }
}

/// Decode the 8-byte header at the start of `buf`.
pub fn decode_header(buf: &[u8]) -> Result<FrameHeader, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::ShortHeader { got: buf.len() });
    }
    let tag = Tag([buf[0], buf[1], buf[2], buf[3]]);
    let length = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok(FrameHeader { tag, length })
}

/// Encode `tag` + `payload` into a single buffer ready for the wire.
pub fn encode_frame(tag: Tag, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let header = FrameHeader {
        tag,
        length: payload.len() as u32,
    };

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// One message on the side channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: Tag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(self.tag, &self.payload)
    }

    /// Decode one frame from the start of `buf`; trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let header = decode_header(buf)?;
        let expected = header.length as usize;
        let body = &buf[HEADER_LEN..];
        if body.len() < expected {
            return Err(FrameError::ShortPayload {
                expected,
                got: body.len(),
            });
        }
        Ok(Self {
            tag: header.tag,
            payload: body[..expected].to_vec(),
        })
    }
}

/// Read the next frame from `reader`.
///
/// Returns `Ok(None)` when the peer closes cleanly between frames. EOF in
/// the middle of a header or payload is a `FrameError`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header_buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    let header = decode_header(&header_buf[..filled])?;

    let expected = header.length as usize;
    if expected > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge {
            len: expected,
            max: MAX_PAYLOAD_LEN,
        });
    }

    // Grow as bytes arrive rather than trusting the declared length up front
    let mut payload = Vec::with_capacity(expected.min(64 * 1024));
    let got = (&mut *reader)
        .take(expected as u64)
        .read_to_end(&mut payload)
        .await?;
    if got < expected {
        return Err(FrameError::ShortPayload { expected, got });
    }

    Ok(Some(Frame {
        tag: header.tag,
        payload,
    }))
}

/// Write `frame` to `writer` and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let buf = frame.encode()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
