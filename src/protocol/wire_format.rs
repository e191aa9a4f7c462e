//! Wire format encoding and decoding.
//!
//! Both directions use the same 3-byte header, differing only in the
//! meaning of the first byte:
//! ```text
//! request:                          reply:
//! ┌────────┬──────────┬─────────┐   ┌────────┬──────────┬─────────┐
//! │ Opcode │ Length   │ Payload │   │ Status │ Length   │ Payload │
//! │ 1 byte │ 2 bytes  │ N bytes │   │ 1 byte │ 2 bytes  │ N bytes │
//! │        │ uint16 LE│         │   │        │ uint16 LE│         │
//! └────────┴──────────┴─────────┘   └────────┴──────────┴─────────┘
//! ```
//!
//! There is no delimiter and no request ID: the declared length is the only
//! framing information, so reads must be byte-exact.

use crate::error::{MonitorError, Result};

/// Header size in bytes (fixed, exactly 3).
pub const HEADER_SIZE: usize = 3;

/// Maximum payload size a 16-bit length field can carry.
pub const MAX_PAYLOAD_SIZE: usize = 0xFFFF;

/// Reply status meaning success. Anything else is an application error.
pub const STATUS_OK: u8 = 0;

/// Common interface of the two header kinds, used by [`FrameBuffer`](super::FrameBuffer).
pub trait FrameHeader: Copy + std::fmt::Debug {
    /// Decode from at least [`HEADER_SIZE`] bytes. Returns `None` if too short.
    fn decode(buf: &[u8]) -> Option<Self>;

    /// Declared payload length.
    fn payload_length(&self) -> usize;
}

/// Header of a client → emulator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Transport opcode.
    pub opcode: u8,
    /// Payload length in bytes.
    pub payload_length: u16,
}

impl RequestHeader {
    /// Create a new request header.
    pub fn new(opcode: u8, payload_length: u16) -> Self {
        Self {
            opcode,
            payload_length,
        }
    }

    /// Encode header to bytes (Little Endian length).
    ///
    /// # Example
    ///
    /// ```
    /// use a800mon_client::protocol::RequestHeader;
    ///
    /// let bytes = RequestHeader::new(3, 4).encode();
    /// assert_eq!(bytes, [3, 4, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (3 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.opcode;
        buf[1..3].copy_from_slice(&self.payload_length.to_le_bytes());
    }

    /// Decode header from bytes. Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            opcode: buf[0],
            payload_length: u16::from_le_bytes([buf[1], buf[2]]),
        })
    }
}

impl FrameHeader for RequestHeader {
    fn decode(buf: &[u8]) -> Option<Self> {
        RequestHeader::decode(buf)
    }

    fn payload_length(&self) -> usize {
        self.payload_length as usize
    }
}

/// Header of an emulator → client reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Status byte (0 = success).
    pub status: u8,
    /// Payload length in bytes.
    pub payload_length: u16,
}

impl ReplyHeader {
    /// Create a new reply header.
    pub fn new(status: u8, payload_length: u16) -> Self {
        Self {
            status,
            payload_length,
        }
    }

    /// Encode header to bytes (Little Endian length).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.status;
        buf[1..3].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Decode header from bytes. Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use a800mon_client::protocol::ReplyHeader;
    ///
    /// let header = ReplyHeader::decode(&[0, 0x00, 0x04]).unwrap();
    /// assert!(header.is_ok());
    /// assert_eq!(header.payload_length, 0x0400);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            status: buf[0],
            payload_length: u16::from_le_bytes([buf[1], buf[2]]),
        })
    }

    /// Check if the peer reported success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

impl FrameHeader for ReplyHeader {
    fn decode(buf: &[u8]) -> Option<Self> {
        ReplyHeader::decode(buf)
    }

    fn payload_length(&self) -> usize {
        self.payload_length as usize
    }
}

/// Convert a payload length to its 16-bit wire form.
///
/// Fails with a protocol error instead of silently truncating.
pub fn wire_length(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        MonitorError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            len, MAX_PAYLOAD_SIZE
        ))
    })
}

/// Encode a request header to bytes (standalone function).
#[inline]
pub fn encode_request_header(opcode: u8, payload_length: u16) -> [u8; HEADER_SIZE] {
    RequestHeader::new(opcode, payload_length).encode()
}

/// Decode a reply header from bytes (standalone function).
#[inline]
pub fn decode_reply_header(buf: &[u8]) -> Option<ReplyHeader> {
    ReplyHeader::decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_little_endian() {
        let bytes = RequestHeader::new(0x15, 0x0102).encode();
        assert_eq!(bytes, [0x15, 0x02, 0x01]);
    }

    #[test]
    fn test_reply_header_roundtrip() {
        let original = ReplyHeader::new(2, 0xBEEF);
        let decoded = ReplyHeader::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
        assert!(!decoded.is_ok());
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(RequestHeader::decode(&[1, 2]).is_none());
        assert!(decode_reply_header(&[0]).is_none());
    }

    #[test]
    fn test_wire_length_limits() {
        assert_eq!(wire_length(0).unwrap(), 0);
        assert_eq!(wire_length(MAX_PAYLOAD_SIZE).unwrap(), 0xFFFF);
        let err = wire_length(MAX_PAYLOAD_SIZE + 1).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_standalone_functions() {
        let encoded = encode_request_header(5, 0);
        assert_eq!(encoded, [5, 0, 0]);
        let header = <RequestHeader as FrameHeader>::decode(&encoded).unwrap();
        assert_eq!(header.opcode, 5);
        assert_eq!(FrameHeader::payload_length(&header), 0);
    }
}
