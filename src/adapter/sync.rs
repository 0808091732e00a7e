//! Request/response client that waits for the reply.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use super::{decode_reply, ClientCore, Invoke};
use crate::call::Call;
use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result, TimeoutKind};
use crate::listener::ResponseListener;

/// Client bound to one endpoint whose calls resolve to the decoded reply.
///
/// Each call picks a channel from the pool (redialing if needed), registers
/// with the channel and waits for the outcome. The wait is bounded by twice
/// the socket timeout; the channel's own timers normally fire first.
pub struct SyncClient {
    core: ClientCore,
    runtime: Option<Handle>,
}

/// Delivers the reply or failure to the waiting caller.
struct ReplySlot {
    tx: oneshot::Sender<Result<Bytes>>,
}

impl ResponseListener for ReplySlot {
    fn on_response_received(self: Box<Self>, response: Bytes) {
        let _ = self.tx.send(Ok(response));
    }

    fn on_channel_error(self: Box<Self>, cause: MuxError) {
        let _ = self.tx.send(Err(cause));
    }
}

/// Resolves a oneway call once its frame is written.
struct SentSlot {
    tx: Option<oneshot::Sender<Result<()>>>,
}

impl ResponseListener for SentSlot {
    fn on_request_sent(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(()));
        }
    }

    fn on_response_received(self: Box<Self>, _response: Bytes) {}

    fn on_channel_error(mut self: Box<Self>, cause: MuxError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(cause));
        }
    }
}

impl SyncClient {
    pub(crate) fn new(core: ClientCore, runtime: Option<Handle>) -> Self {
        Self { core, runtime }
    }

    /// Send `call` and wait for its reply.
    pub async fn call<C: Call>(&self, call: C) -> Result<C::Response> {
        let (sequence_id, frame) = self.core.encode(&call, false)?;
        let (tx, rx) = oneshot::channel();

        self.core
            .dispatch(sequence_id, frame, false, Box::new(ReplySlot { tx }))
            .await?;

        let body = self.wait(rx).await?;
        decode_reply(self.core.rewriter(), call, body)
    }

    /// Send a oneway `call`; resolves once it has been written.
    pub async fn send_oneway<C: Call>(&self, call: C) -> Result<()> {
        let (sequence_id, frame) = self.core.encode(&call, true)?;
        let (tx, rx) = oneshot::channel();

        self.core
            .dispatch(sequence_id, frame, true, Box::new(SentSlot { tx: Some(tx) }))
            .await?;

        self.wait(rx).await
    }

    /// Run [`call`](Self::call) to completion from a thread that is not
    /// running async code.
    ///
    /// Uses the runtime the client was created on, which must be a
    /// multi-threaded runtime driven by other threads.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async task.
    pub fn call_blocking<C: Call>(&self, call: C) -> Result<C::Response> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            MuxError::Config("client was created without a runtime handle".to_string())
        })?;
        runtime.block_on(self.call(call))
    }

    async fn wait<T>(&self, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.core.socket_timeout().saturating_mul(2), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(MuxError::ChannelError(
                "request dropped without a response".to_string(),
            )),
            Err(_) => Err(MuxError::TimedOut(TimeoutKind::Receive)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.core.endpoint()
    }

    pub fn socket_timeout(&self) -> Duration {
        self.core.socket_timeout()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.core.connect_timeout()
    }
}

impl Invoke for SyncClient {
    fn invoke<C: Call>(&self, call: C) -> impl Future<Output = Result<C::Response>> + Send {
        self.call(call)
    }
}
