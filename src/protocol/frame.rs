//! Frame struct with typed accessors.
//!
//! Represents one complete request or reply: header plus payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use a800mon_client::protocol::{build_reply, FrameBuffer, Reply};
//!
//! let bytes = build_reply(0, b"hello").unwrap();
//! let mut buffer = FrameBuffer::<a800mon_client::protocol::ReplyHeader>::new();
//! let frames: Vec<Reply> = buffer.push(&bytes).unwrap();
//!
//! assert_eq!(frames[0].status(), 0);
//! assert_eq!(frames[0].payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{wire_length, ReplyHeader, RequestHeader, HEADER_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame<H> {
    /// Decoded header.
    pub header: H,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

/// A client → emulator frame.
pub type Request = Frame<RequestHeader>;

/// An emulator → client frame.
pub type Reply = Frame<ReplyHeader>;

impl<H> Frame<H> {
    /// Create a new frame from header and payload.
    pub fn new(header: H, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

impl Request {
    /// Get the opcode.
    #[inline]
    pub fn opcode(&self) -> u8 {
        self.header.opcode
    }
}

impl Reply {
    /// Get the status byte.
    #[inline]
    pub fn status(&self) -> u8 {
        self.header.status
    }

    /// Check if the peer reported success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.header.is_ok()
    }
}

/// Build a complete request as a single byte vector.
///
/// The whole frame goes out in one write so a partially written header can
/// never be followed by another caller's bytes.
///
/// # Example
///
/// ```
/// use a800mon_client::protocol::build_request;
///
/// let bytes = build_request(3, &[0x00, 0x06, 0x10, 0x00]).unwrap();
/// assert_eq!(bytes, vec![3, 4, 0, 0x00, 0x06, 0x10, 0x00]);
/// ```
pub fn build_request(opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let header = RequestHeader::new(opcode, wire_length(payload.len())?);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Build a complete reply as a single byte vector.
pub fn build_reply(status: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let header = ReplyHeader::new(status, wire_length(payload.len())?);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}
