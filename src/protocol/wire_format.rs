//! Wire format encoding and decoding.
//!
//! Every message on the wire is a frame with a 4-byte length prefix:
//! ```text
//! ┌──────────┬──────────────────────────┐
//! │ Length   │ Body                     │
//! │ 4 bytes  │ `Length` bytes           │
//! │ uint32 BE│ envelope + arguments     │
//! └──────────┴──────────────────────────┘
//! ```
//!
//! The length counts body bytes only, never the prefix itself.

use crate::error::{MuxError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_FIELD_LENGTH: usize = 4;

/// Default maximum frame body size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Extra bytes allowed on top of the configured max frame size for the
/// message envelope.
pub const FRAME_HEADER_SLACK: usize = 1024;

/// Largest body the client will send or accept for a configured max frame size.
#[inline]
pub fn max_accepted_frame(max_frame_size: usize) -> usize {
    max_frame_size.saturating_add(FRAME_HEADER_SLACK)
}

/// Encode a body length into its 4-byte big-endian prefix.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the length does not fit in a `u32`.
#[inline]
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_FIELD_LENGTH]> {
    let len = u32::try_from(len).map_err(|_| MuxError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    Ok(len.to_be_bytes())
}

/// Decode a length prefix. Returns `None` if fewer than 4 bytes are given.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_FIELD_LENGTH] = buf.get(..LENGTH_FIELD_LENGTH)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix) as usize)
}

/// Build a complete frame (prefix + body) as a single buffer.
pub fn build_frame(body: &[u8]) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(LENGTH_FIELD_LENGTH + body.len());
    frame.extend_from_slice(&encode_length(body.len())?);
    frame.extend_from_slice(body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_big_endian() {
        assert_eq!(encode_length(0x0102_0304).unwrap(), [1, 2, 3, 4]);
        assert_eq!(decode_length(&[0, 0, 1, 0]), Some(256));
    }

    #[test]
    fn test_decode_length_short_buffer() {
        assert_eq!(decode_length(&[0, 0, 1]), None);
        assert_eq!(decode_length(&[]), None);
    }

    #[test]
    fn test_build_frame_prefix_excludes_itself() {
        let frame = build_frame(b"hello").unwrap();
        assert_eq!(frame.len(), LENGTH_FIELD_LENGTH + 5);
        assert_eq!(decode_length(&frame), Some(5));
        assert_eq!(&frame[LENGTH_FIELD_LENGTH..], b"hello");
    }

    #[test]
    fn test_max_accepted_frame_adds_slack() {
        assert_eq!(max_accepted_frame(100), 100 + FRAME_HEADER_SLACK);
        assert_eq!(max_accepted_frame(usize::MAX), usize::MAX);
    }
}
