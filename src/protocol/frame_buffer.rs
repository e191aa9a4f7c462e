//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 3 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! The buffer is generic over the header kind, so the same parser serves a
//! peer reading requests and a client reading replies.
//!
//! # Example
//!
//! ```
//! use a800mon_client::protocol::{build_request, FrameBuffer, RequestHeader};
//!
//! let bytes = build_request(1, &[]).unwrap();
//! let mut buffer = FrameBuffer::<RequestHeader>::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..2]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[2..]).unwrap();
//! assert_eq!(frames[0].opcode(), 1);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{FrameHeader, HEADER_SIZE};
use super::Frame;
use crate::error::{MonitorError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State<H> {
    /// Waiting for complete header (need 3 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: H, remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer<H> {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State<H>,
}

impl<H: FrameHeader> FrameBuffer<H> {
    /// Create a new frame buffer.
    ///
    /// Default capacity: 64KB, one maximum-size frame.
    pub fn new() -> Self {
        Self::with_capacity(64 * 1024)
    }

    /// Create a new frame buffer with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForHeader,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns a vector of complete frames. If data is fragmented,
    /// partial data is buffered internally for the next push.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame<H>>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame<H>>> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = H::decode(&self.buffer[..HEADER_SIZE]).ok_or_else(|| {
                    MonitorError::Protocol("Incomplete frame header".to_string())
                })?;
                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.payload_length() == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::WaitingForPayload {
                    remaining: header.payload_length(),
                    header,
                };
                self.try_extract_one()
            }

            State::WaitingForPayload { header, remaining } => {
                let remaining = *remaining;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;
                self.state = State::WaitingForHeader;

                Ok(Some(Frame::new(header, payload)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl<H: FrameHeader> Default for FrameBuffer<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_reply, build_request, ReplyHeader, RequestHeader};

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::<ReplyHeader>::new();
        let frames = buffer.push(&build_reply(0, b"hello").unwrap()).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].status(), 0);
        assert_eq!(&frames[0].payload[..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::<RequestHeader>::new();
        let mut combined = Vec::new();
        combined.extend(build_request(1, b"").unwrap());
        combined.extend(build_request(3, &[0, 0x06, 4, 0]).unwrap());
        combined.extend(build_request(5, b"").unwrap());

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode(), 1);
        assert_eq!(frames[1].opcode(), 3);
        assert_eq!(frames[1].payload(), &[0, 0x06, 4, 0]);
        assert_eq!(frames[2].opcode(), 5);
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::<ReplyHeader>::new();
        let bytes = build_reply(0, b"test").unwrap();

        assert!(buffer.push(&bytes[..1]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[1..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::<ReplyHeader>::new();
        let payload = vec![0xA5; 300];
        let bytes = build_reply(0, &payload).unwrap();

        let frames = buffer.push(&bytes[..HEADER_SIZE + 10]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[HEADER_SIZE + 10..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &payload[..]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::<ReplyHeader>::new();
        let bytes = build_reply(0, b"abc").unwrap();
        buffer.push(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();
        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_round_trip_all_boundary_sizes() {
        for size in [0usize, 1, 2, 3, 255, 256, 1024, 0xFFFE, 0xFFFF] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut buffer = FrameBuffer::<ReplyHeader>::new();
            let frames = buffer.push(&build_reply(9, &payload).unwrap()).unwrap();
            assert_eq!(frames.len(), 1, "size {size}");
            assert_eq!(frames[0].status(), 9);
            assert_eq!(frames[0].payload(), &payload[..]);
        }
    }
}
