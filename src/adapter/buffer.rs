//! Reusable send buffer for encoding request frames.
//!
//! Each request is written as `[length placeholder][envelope][arguments]`;
//! [`finish`](RequestBuffer::finish) patches the placeholder and splits the
//! frame off. The buffer then sizes itself for the next request: it grows to
//! fit large frames and halves again once it has been mostly empty for more
//! than [`UNDER_USE_THRESHOLD`] consecutive requests.

use bytes::{Bytes, BytesMut};

use crate::error::{MuxError, Result};
use crate::protocol::{encode_length, LENGTH_FIELD_LENGTH};

/// Smallest capacity the buffer shrinks to.
pub const DEFAULT_MINIMUM_SIZE: usize = 4096;

/// Consecutive under-used requests before the buffer shrinks.
pub const UNDER_USE_THRESHOLD: usize = 100;

#[derive(Debug)]
pub struct RequestBuffer {
    buf: BytesMut,
    capacity: usize,
    minimum: usize,
    under_used: usize,
}

impl RequestBuffer {
    pub fn new() -> Self {
        Self::with_minimum(DEFAULT_MINIMUM_SIZE)
    }

    pub fn with_minimum(minimum: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(minimum),
            capacity: minimum,
            minimum,
            under_used: 0,
        }
    }

    /// Start a new frame by reserving the length placeholder.
    pub fn begin(&mut self) -> &mut BytesMut {
        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; LENGTH_FIELD_LENGTH]);
        &mut self.buf
    }

    /// Buffer to append the envelope and arguments to.
    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes written after the placeholder.
    pub fn body_len(&self) -> usize {
        self.buf.len().saturating_sub(LENGTH_FIELD_LENGTH)
    }

    /// Patch the length prefix and take the finished frame.
    pub fn finish(&mut self) -> Result<Bytes> {
        if self.buf.len() < LENGTH_FIELD_LENGTH {
            self.discard();
            return Err(MuxError::Protocol("finish called before begin".to_string()));
        }
        let body_len = self.body_len();
        let prefix = match encode_length(body_len) {
            Ok(prefix) => prefix,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };
        self.buf[..LENGTH_FIELD_LENGTH].copy_from_slice(&prefix);
        let frame = self.buf.split().freeze();
        self.reset(frame.len());
        Ok(frame)
    }

    /// Drop a partially written frame.
    pub fn discard(&mut self) {
        let written = self.buf.len();
        self.buf.clear();
        self.reset(written);
    }

    /// Capacity the buffer is currently sized for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn reset(&mut self, written: usize) {
        if written > self.capacity {
            self.capacity = written.next_power_of_two();
        }

        let shrunk = self.capacity >> 1;
        if written < shrunk {
            self.under_used += 1;
        } else {
            self.under_used = 0;
        }

        if self.under_used > UNDER_USE_THRESHOLD && shrunk >= self.minimum {
            self.capacity = shrunk;
            self.under_used = 0;
            self.buf = BytesMut::with_capacity(shrunk);
        } else {
            self.buf.clear();
            self.buf.reserve(self.capacity);
        }
    }
}

impl Default for RequestBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_length;

    #[test]
    fn test_finish_patches_length() {
        let mut buffer = RequestBuffer::new();
        buffer.begin().extend_from_slice(b"payload");

        assert_eq!(buffer.body_len(), 7);
        let frame = buffer.finish().unwrap();

        assert_eq!(decode_length(&frame), Some(7));
        assert_eq!(&frame[LENGTH_FIELD_LENGTH..], b"payload");
        assert_eq!(buffer.body_len(), 0);
    }

    #[test]
    fn test_grows_for_large_frames() {
        let mut buffer = RequestBuffer::new();
        buffer.begin().extend_from_slice(&vec![1u8; 10_000]);
        buffer.finish().unwrap();

        assert_eq!(buffer.capacity(), 16_384);
    }

    #[test]
    fn test_shrinks_after_sustained_under_use() {
        let mut buffer = RequestBuffer::new();
        buffer.begin().extend_from_slice(&vec![1u8; 10_000]);
        buffer.finish().unwrap();
        assert_eq!(buffer.capacity(), 16_384);

        for _ in 0..=UNDER_USE_THRESHOLD {
            buffer.begin().extend_from_slice(b"tiny");
            buffer.finish().unwrap();
        }
        assert_eq!(buffer.capacity(), 8192);
    }

    #[test]
    fn test_never_shrinks_below_minimum() {
        let mut buffer = RequestBuffer::new();
        for _ in 0..(UNDER_USE_THRESHOLD * 3) {
            buffer.begin().extend_from_slice(b"x");
            buffer.finish().unwrap();
        }
        assert_eq!(buffer.capacity(), DEFAULT_MINIMUM_SIZE);
    }

    #[test]
    fn test_one_large_frame_resets_streak() {
        let mut buffer = RequestBuffer::new();
        buffer.begin().extend_from_slice(&vec![1u8; 10_000]);
        buffer.finish().unwrap();

        for _ in 0..UNDER_USE_THRESHOLD {
            buffer.begin().extend_from_slice(b"tiny");
            buffer.finish().unwrap();
        }
        buffer.begin().extend_from_slice(&vec![1u8; 9000]);
        buffer.finish().unwrap();
        buffer.begin().extend_from_slice(b"tiny");
        buffer.finish().unwrap();

        assert_eq!(buffer.capacity(), 16_384);
    }

    #[test]
    fn test_discard_drops_partial_frame() {
        let mut buffer = RequestBuffer::new();
        buffer.begin().extend_from_slice(b"half");
        buffer.discard();

        buffer.begin().extend_from_slice(b"whole");
        let frame = buffer.finish().unwrap();
        assert_eq!(&frame[LENGTH_FIELD_LENGTH..], b"whole");
    }

    #[test]
    fn test_finish_without_begin_is_an_error() {
        let mut buffer = RequestBuffer::new();
        assert!(matches!(buffer.finish(), Err(MuxError::Protocol(_))));

        buffer.begin().extend_from_slice(b"next");
        let frame = buffer.finish().unwrap();
        assert_eq!(decode_length(&frame), Some(4));
    }
}
