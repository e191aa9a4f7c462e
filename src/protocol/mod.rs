//! Protocol module - wire format, framing, commands and payload layouts.
//!
//! This module implements the emulator's binary monitor protocol:
//! - 3-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Logical command set and capability-gated opcode table
//! - Typed little-endian reply decoders and request encoders

mod command;
mod frame;
mod frame_buffer;
pub mod payload;
mod wire_format;

pub use command::{capability, Command, CommandTable};
pub use frame::{build_reply, build_request, Frame, Reply, Request};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_reply_header, encode_request_header, wire_length, FrameHeader, ReplyHeader,
    RequestHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, STATUS_OK,
};
