//! Client that delivers replies to a callback.

use bytes::Bytes;

use super::{decode_reply, ClientCore};
use crate::call::Call;
use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result};
use crate::listener::{listener_fn, ResponseListener};
use crate::sequence::SequenceRewriter;

/// Client bound to one endpoint that returns as soon as a call is dispatched.
///
/// Callbacks run on the factory's response executor, a small pool of
/// threads shared by every channel. A slow callback never stalls socket
/// I/O, but it does occupy one of those threads.
pub struct AsyncClient {
    core: ClientCore,
}

struct CallbackListener<C, F> {
    call: C,
    callback: F,
    rewriter: SequenceRewriter,
}

impl<C, F> ResponseListener for CallbackListener<C, F>
where
    C: Call,
    F: FnOnce(Result<C::Response>) + Send + 'static,
{
    fn on_response_received(self: Box<Self>, response: Bytes) {
        let CallbackListener {
            call,
            callback,
            rewriter,
        } = *self;
        callback(decode_reply(&rewriter, call, response))
    }

    fn on_channel_error(self: Box<Self>, cause: MuxError) {
        let CallbackListener { callback, .. } = *self;
        callback(Err(cause))
    }
}

impl AsyncClient {
    pub(crate) fn new(core: ClientCore) -> Self {
        Self { core }
    }

    /// Dispatch `call`; `callback` later receives the decoded reply or error.
    ///
    /// Errors before dispatch (encoding, connecting, backpressure) are
    /// returned here and the callback is never invoked.
    pub async fn call<C, F>(&self, call: C, callback: F) -> Result<()>
    where
        C: Call,
        F: FnOnce(Result<C::Response>) + Send + 'static,
    {
        let (sequence_id, frame) = self.core.encode(&call, false)?;
        let listener = CallbackListener {
            call,
            callback,
            rewriter: self.core.rewriter().clone(),
        };
        self.core
            .dispatch(sequence_id, frame, false, Box::new(listener))
            .await
    }

    /// Dispatch a oneway `call` without waiting for it to be written.
    pub async fn send_oneway<C: Call>(&self, call: C) -> Result<()> {
        let (sequence_id, frame) = self.core.encode(&call, true)?;
        let method = call.method_name().to_owned();
        let listener = listener_fn(move |outcome| {
            if let Err(e) = outcome {
                tracing::warn!("Oneway call {} failed: {}", method, e);
            }
        });
        self.core.dispatch(sequence_id, frame, true, listener).await
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.core.endpoint()
    }
}
