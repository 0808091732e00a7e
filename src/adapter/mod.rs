//! Call adapters - typed calls on top of the connection pool.
//!
//! - [`SyncClient`] - `call().await` returns the decoded reply; also has a
//!   blocking entry point for non-async threads
//! - [`AsyncClient`] - dispatches and hands the reply to a callback
//! - [`DelegatingClient`] - forwards to a swappable inner client
//!
//! All of them encode through a [`RequestBuffer`] with a
//! [`SequenceRewriter`](crate::SequenceRewriter), so the sequence id on the
//! wire always comes from the shared counter.

mod buffer;
mod callback;
mod delegate;
mod sync;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

pub use buffer::{RequestBuffer, DEFAULT_MINIMUM_SIZE, UNDER_USE_THRESHOLD};
pub use callback::AsyncClient;
pub use delegate::DelegatingClient;
pub use sync::SyncClient;

use crate::call::Call;
use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result};
use crate::listener::ResponseListener;
use crate::pool::ConnectionPool;
use crate::protocol::{max_accepted_frame, MessageHeader, MessageType};
use crate::sequence::{SequenceRewriter, NORMALIZED_SEQUENCE_ID};

/// Something that can perform a [`Call`] and return its reply.
pub trait Invoke: Send + Sync + 'static {
    fn invoke<C: Call>(&self, call: C) -> impl Future<Output = Result<C::Response>> + Send;
}

/// Encodes calls into complete request frames.
pub(crate) struct RequestEncoder {
    rewriter: SequenceRewriter,
    buffer: Mutex<RequestBuffer>,
    max_frame_size: usize,
}

impl RequestEncoder {
    pub(crate) fn new(rewriter: SequenceRewriter, max_frame_size: usize) -> Self {
        Self {
            rewriter,
            buffer: Mutex::new(RequestBuffer::new()),
            max_frame_size,
        }
    }

    /// Encode `call`, returning the rewritten sequence id and the frame.
    ///
    /// Fails with `FrameTooLarge` before anything is sent if the body
    /// exceeds the max frame size plus envelope slack.
    pub(crate) fn encode<C: Call>(&self, call: &C, message_type: MessageType) -> Result<(u32, Bytes)> {
        let header = MessageHeader::new(call.method_name(), message_type, NORMALIZED_SEQUENCE_ID);
        let mut buffer = self.buffer.lock();

        let sequence_id = match self.rewriter.write_message_begin(buffer.begin(), &header) {
            Ok(id) => id,
            Err(e) => {
                buffer.discard();
                return Err(e);
            }
        };
        if let Err(e) = call.write_args(buffer.body_mut()) {
            buffer.discard();
            return Err(e);
        }

        let size = buffer.body_len();
        let max = max_accepted_frame(self.max_frame_size);
        if size > max {
            buffer.discard();
            return Err(MuxError::FrameTooLarge { size, max });
        }

        Ok((sequence_id, buffer.finish()?))
    }

    pub(crate) fn rewriter(&self) -> &SequenceRewriter {
        &self.rewriter
    }

    #[cfg(test)]
    pub(crate) fn buffer_capacity(&self) -> usize {
        self.buffer.lock().capacity()
    }
}

/// Decode a reply frame body for `call`.
pub(crate) fn decode_reply<C: Call>(
    rewriter: &SequenceRewriter,
    call: C,
    mut body: Bytes,
) -> Result<C::Response> {
    let header = rewriter.read_message_begin(&mut body)?;
    if header.name != call.method_name() {
        return Err(MuxError::Protocol(format!(
            "Reply for '{}' received for call '{}'",
            header.name,
            call.method_name()
        )));
    }
    match header.message_type {
        MessageType::Reply => call.read_response(body),
        MessageType::Exception => Err(MuxError::Remote(
            String::from_utf8_lossy(&body).into_owned(),
        )),
        other => Err(MuxError::Protocol(format!(
            "Unexpected {:?} message in reply to '{}'",
            other, header.name
        ))),
    }
}

/// State shared by every adapter bound to one endpoint.
pub(crate) struct ClientCore {
    pool: ConnectionPool,
    endpoint: Endpoint,
    encoder: RequestEncoder,
    socket_timeout: Duration,
    connect_timeout: Duration,
}

impl ClientCore {
    pub(crate) fn new(
        pool: ConnectionPool,
        endpoint: Endpoint,
        encoder: RequestEncoder,
        socket_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            endpoint,
            encoder,
            socket_timeout,
            connect_timeout,
        }
    }

    pub(crate) fn encode<C: Call>(&self, call: &C, oneway: bool) -> Result<(u32, Bytes)> {
        let message_type = if oneway {
            MessageType::Oneway
        } else {
            MessageType::Call
        };
        self.encoder.encode(call, message_type)
    }

    /// Pick a channel for the endpoint and hand it the frame.
    pub(crate) async fn dispatch(
        &self,
        sequence_id: u32,
        frame: Bytes,
        oneway: bool,
        listener: Box<dyn ResponseListener>,
    ) -> Result<()> {
        let channel = self
            .pool
            .acquire_channel(&self.endpoint, self.connect_timeout)
            .await?;
        channel
            .dispatch(sequence_id, frame, oneway, listener, self.socket_timeout)
            .await
    }

    pub(crate) fn rewriter(&self) -> &SequenceRewriter {
        self.encoder.rewriter()
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::MsgPackCall;
    use crate::protocol::{peek_sequence_id, LENGTH_FIELD_LENGTH};
    use crate::sequence::SequenceCounter;
    use bytes::BytesMut;
    use std::sync::Arc;

    fn encoder(max_frame_size: usize) -> RequestEncoder {
        let counter = Arc::new(SequenceCounter::starting_at(40));
        RequestEncoder::new(SequenceRewriter::new(counter), max_frame_size)
    }

    fn reply(name: &str, message_type: MessageType, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        MessageHeader::new(name, message_type, 40)
            .encode_into(&mut buf)
            .unwrap();
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    #[test]
    fn test_encode_assigns_fresh_ids() {
        let encoder = encoder(1024);
        let call: MsgPackCall<_, ()> = MsgPackCall::new("put", ("k", "v"));

        let (first, frame) = encoder.encode(&call, MessageType::Call).unwrap();
        let (second, _) = encoder.encode(&call, MessageType::Call).unwrap();

        assert_eq!((first, second), (40, 41));
        assert_eq!(peek_sequence_id(&frame[LENGTH_FIELD_LENGTH..]).unwrap(), 40);
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let encoder = encoder(16);
        let call: MsgPackCall<_, ()> = MsgPackCall::new("blob", vec![0u8; 4096]);

        let result = encoder.encode(&call, MessageType::Call);
        assert!(matches!(result, Err(MuxError::FrameTooLarge { max: 1040, .. })));

        // Buffer is usable again afterwards
        let small: MsgPackCall<_, ()> = MsgPackCall::new("ok", ());
        assert!(encoder.encode(&small, MessageType::Call).is_ok());
        assert!(encoder.buffer_capacity() >= DEFAULT_MINIMUM_SIZE);
    }

    #[test]
    fn test_decode_reply() {
        let rewriter = SequenceRewriter::new(Arc::new(SequenceCounter::new()));
        let call: MsgPackCall<(), String> = MsgPackCall::new("hello", ());
        let payload = crate::codec::MsgPackCodec::encode("world").unwrap();

        let decoded = decode_reply(&rewriter, call, reply("hello", MessageType::Reply, &payload));
        assert_eq!(decoded.unwrap(), "world");
    }

    #[test]
    fn test_decode_exception_reply() {
        let rewriter = SequenceRewriter::new(Arc::new(SequenceCounter::new()));
        let call: MsgPackCall<(), String> = MsgPackCall::new("hello", ());

        let decoded = decode_reply(
            &rewriter,
            call,
            reply("hello", MessageType::Exception, b"no such key"),
        );
        match decoded {
            Err(MuxError::Remote(message)) => assert_eq!(message, "no such key"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_reply_for_wrong_method() {
        let rewriter = SequenceRewriter::new(Arc::new(SequenceCounter::new()));
        let call: MsgPackCall<(), String> = MsgPackCall::new("hello", ());

        let decoded = decode_reply(&rewriter, call, reply("other", MessageType::Reply, b""));
        assert!(matches!(decoded, Err(MuxError::Protocol(_))));
    }
}
