//! Sequence id allocation and envelope rewriting.
//!
//! Every outgoing request gets a sequence id from one [`SequenceCounter`]
//! shared by all clients of a factory, so ids are unique across every
//! channel the requests may land on. Callers never pick ids themselves: the
//! [`SequenceRewriter`] overwrites whatever id the caller put in the envelope.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::protocol::MessageHeader;

/// Sequence id handed back to callers in decoded reply envelopes.
pub const NORMALIZED_SEQUENCE_ID: u32 = 0;

/// Monotonic, wrapping sequence id source.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Allocate the next id. Wraps at `u32::MAX`.
    #[inline]
    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Writes request envelopes with a freshly allocated sequence id and reads
/// reply envelopes back with the id normalized.
#[derive(Debug, Clone)]
pub struct SequenceRewriter {
    counter: Arc<SequenceCounter>,
}

impl SequenceRewriter {
    pub fn new(counter: Arc<SequenceCounter>) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &Arc<SequenceCounter> {
        &self.counter
    }

    /// Append `header` to `out` with its sequence id replaced.
    ///
    /// Returns the id actually written; the channel correlates on it.
    pub fn write_message_begin(&self, out: &mut BytesMut, header: &MessageHeader) -> Result<u32> {
        let sequence_id = self.counter.next_id();
        let rewritten = MessageHeader {
            sequence_id,
            ..header.clone()
        };
        rewritten.encode_into(out)?;
        Ok(sequence_id)
    }

    /// Decode a reply envelope from the front of `body`.
    ///
    /// The wire id is only meaningful to the channel, so the returned header
    /// carries [`NORMALIZED_SEQUENCE_ID`].
    pub fn read_message_begin(&self, body: &mut Bytes) -> Result<MessageHeader> {
        let mut header = MessageHeader::decode(body)?;
        header.sequence_id = NORMALIZED_SEQUENCE_ID;
        Ok(header)
    }
}
