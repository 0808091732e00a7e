//! Call descriptors.
//!
//! A [`Call`] knows its method name, how to write its arguments after the
//! envelope, and how to decode the reply that comes back. Adapters take any
//! `Call` and handle framing, sequence ids and correlation.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::error::Result;

/// One remote invocation.
pub trait Call: Send + 'static {
    type Response: Send + 'static;

    fn method_name(&self) -> &str;

    /// Append the encoded arguments to `out`.
    fn write_args(&self, out: &mut BytesMut) -> Result<()>;

    /// Decode the reply arguments (the body after the envelope).
    fn read_response(self, body: Bytes) -> Result<Self::Response>;
}

/// A call whose arguments and result are MessagePack encoded.
///
/// # Example
///
/// ```
/// use muxwire::{Call, MsgPackCall};
///
/// let call: MsgPackCall<(i64, i64), i64> = MsgPackCall::new("add", (2, 3));
/// assert_eq!(call.method_name(), "add");
/// ```
pub struct MsgPackCall<A, R> {
    method: String,
    args: A,
    _response: PhantomData<fn() -> R>,
}

impl<A, R> MsgPackCall<A, R> {
    pub fn new(method: impl Into<String>, args: A) -> Self {
        Self {
            method: method.into(),
            args,
            _response: PhantomData,
        }
    }

    pub fn args(&self) -> &A {
        &self.args
    }
}

impl<A, R> Call for MsgPackCall<A, R>
where
    A: Serialize + Send + 'static,
    R: DeserializeOwned + Send + 'static,
{
    type Response = R;

    fn method_name(&self) -> &str {
        &self.method
    }

    fn write_args(&self, out: &mut BytesMut) -> Result<()> {
        MsgPackCodec::encode_into(&self.args, out)
    }

    fn read_response(self, body: Bytes) -> Result<R> {
        MsgPackCodec::decode(&body)
    }
}
