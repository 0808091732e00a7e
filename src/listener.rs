//! Completion callbacks for dispatched requests.

use bytes::Bytes;

use crate::error::{MuxError, Result};

/// Receives the outcome of one dispatched request.
///
/// A listener gets at most one `on_request_sent` and exactly one terminal
/// callback (`on_response_received` or `on_channel_error`); the terminal
/// methods consume the listener. Oneway requests never get a terminal
/// callback: `on_request_sent` is their last event.
///
/// `on_request_sent` runs on the channel's driver task and must not block.
/// It always precedes the terminal callback, even when the reply is read
/// before the write completes. Terminal callbacks run on the
/// [`ResponseExecutor`](crate::ResponseExecutor), where blocking only delays
/// other callbacks.
pub trait ResponseListener: Send + 'static {
    /// The request frame was fully written to the socket.
    fn on_request_sent(&mut self) {}

    /// A response frame with this request's sequence id arrived.
    ///
    /// `response` is the complete frame body, envelope included.
    fn on_response_received(self: Box<Self>, response: Bytes);

    /// The request failed: timeout, write error, or channel failure.
    fn on_channel_error(self: Box<Self>, cause: MuxError);
}

/// Adapts a closure into a [`ResponseListener`].
pub struct FnListener<F> {
    callback: F,
}

impl<F> ResponseListener for FnListener<F>
where
    F: FnOnce(Result<Bytes>) + Send + 'static,
{
    fn on_response_received(self: Box<Self>, response: Bytes) {
        let FnListener { callback } = *self;
        callback(Ok(response))
    }

    fn on_channel_error(self: Box<Self>, cause: MuxError) {
        let FnListener { callback } = *self;
        callback(Err(cause))
    }
}

/// Box a closure receiving the request outcome as a listener.
///
/// # Example
///
/// ```
/// use muxwire::listener_fn;
///
/// let listener = listener_fn(|outcome| match outcome {
///     Ok(body) => println!("{} byte response", body.len()),
///     Err(e) => eprintln!("request failed: {}", e),
/// });
/// # drop(listener);
/// ```
pub fn listener_fn<F>(callback: F) -> Box<dyn ResponseListener>
where
    F: FnOnce(Result<Bytes>) + Send + 'static,
{
    Box::new(FnListener { callback })
}
