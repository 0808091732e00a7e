//! Protocol module - framing and message envelope.
//!
//! This module implements the byte-level protocol:
//! - 4-byte big-endian length prefix
//! - Frame buffer for accumulating partial reads
//! - Message envelope carrying method name, message type and sequence id

mod envelope;
mod frame_buffer;
mod wire_format;

pub use envelope::{peek_sequence_id, MessageHeader, MessageType, ENVELOPE_FIXED_SIZE};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    build_frame, decode_length, encode_length, max_accepted_frame, DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_SLACK, LENGTH_FIELD_LENGTH,
};
