//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need at least 4 bytes
//! - `WaitingForBody`: Length parsed, need N more body bytes
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let frame = build_frame(b"hello").unwrap();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&frame[..3]).unwrap().is_empty());
//! let bodies = buffer.push(&frame[3..]).unwrap();
//! assert_eq!(&bodies[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_length, max_accepted_frame, DEFAULT_MAX_FRAME_SIZE, LENGTH_FIELD_LENGTH,
};
use crate::error::{MuxError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete length prefix.
    WaitingForLength,
    /// Prefix consumed, waiting for body bytes.
    WaitingForBody { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frame bodies.
///
/// A length prefix larger than the configured maximum is a protocol violation;
/// the buffer is left unusable and the connection should be dropped.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed body size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer accepting the default max frame plus envelope slack.
    pub fn new() -> Self {
        Self::with_max_frame(max_accepted_frame(DEFAULT_MAX_FRAME_SIZE))
    }

    /// Create a new frame buffer with a custom maximum body size.
    pub fn with_max_frame(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frame bodies.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a length prefix exceeds the maximum.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut bodies = Vec::new();
        while let Some(body) = self.try_extract_one()? {
            bodies.push(body);
        }
        Ok(bodies)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let Some(length) = decode_length(&self.buffer) else {
                        return Ok(None);
                    };
                    if length > self.max_frame_size {
                        return Err(MuxError::FrameTooLarge {
                            size: length,
                            max: self.max_frame_size,
                        });
                    }
                    let _ = self.buffer.split_to(LENGTH_FIELD_LENGTH);
                    self.state = State::WaitingForBody { remaining: length };
                }
                State::WaitingForBody { remaining } => {
                    if self.buffer.len() < remaining {
                        // Make room for the rest of a large body in one go.
                        self.buffer.reserve(remaining - self.buffer.len());
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(body));
                }
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

    /// Maximum body size this buffer accepts.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;
    use proptest::prelude::*;

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"hello").unwrap()).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        combined.extend_from_slice(&build_frame(b"first").unwrap());
        combined.extend_from_slice(&build_frame(b"second").unwrap());
        combined.extend_from_slice(&build_frame(b"third").unwrap());

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"first");
        assert_eq!(&frames[1][..], b"second");
        assert_eq!(&frames[2][..], b"third");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_length() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"test").unwrap();

        let frames = buffer.push(&frame[..2]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");

        let frames = buffer.push(&frame[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"test");
    }

    #[test]
    fn test_fragmented_body() {
        let mut buffer = FrameBuffer::new();
        let body = b"this is a longer body that will be fragmented";
        let frame = build_frame(body).unwrap();

        let partial = LENGTH_FIELD_LENGTH + 10;
        assert!(buffer.push(&frame[..partial]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForBody");

        let frames = buffer.push(&frame[partial..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], body);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_body() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"").unwrap()).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_max_frame_validation() {
        let mut buffer = FrameBuffer::with_max_frame(100);

        // Prefix claiming a 1000 byte body
        let result = buffer.push(&1000u32.to_be_bytes());

        assert!(matches!(
            result,
            Err(MuxError::FrameTooLarge {
                size: 1000,
                max: 100
            })
        ));
    }

    #[test]
    fn test_frame_at_exact_max_is_accepted() {
        let mut buffer = FrameBuffer::with_max_frame(8);
        let frames = buffer.push(&build_frame(&[7u8; 8]).unwrap()).unwrap();
        assert_eq!(frames[0].len(), 8);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"test").unwrap();

        buffer.push(&frame[..6]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForBody");
        assert_eq!(buffer.len(), 2);

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForLength");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"hi").unwrap();

        let mut all = Vec::new();
        for byte in &frame {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    proptest! {
        #[test]
        fn prop_arbitrary_chunking_yields_same_bodies(
            bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..8),
            chunk in 1usize..17,
        ) {
            let mut stream = Vec::new();
            for body in &bodies {
                stream.extend_from_slice(&build_frame(body).unwrap());
            }

            let mut buffer = FrameBuffer::new();
            let mut out = Vec::new();
            for piece in stream.chunks(chunk) {
                out.extend(buffer.push(piece).unwrap());
            }

            prop_assert_eq!(out.len(), bodies.len());
            for (got, want) in out.iter().zip(&bodies) {
                prop_assert_eq!(&got[..], &want[..]);
            }
            prop_assert!(buffer.is_empty());
        }
    }
}
