//! Forwarding client whose target can be swapped at runtime.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Invoke;
use crate::call::Call;
use crate::error::Result;

/// Forwards every call to the current delegate.
///
/// Calls already in flight keep using the delegate they started with.
///
/// # Example
///
/// ```no_run
/// # async fn run(factory: muxwire::ClientFactory) -> muxwire::Result<()> {
/// use muxwire::{DelegatingClient, Invoke, MsgPackCall};
///
/// let primary = factory.sync_client("10.0.0.1:9090".parse()?);
/// let client = DelegatingClient::new(primary);
///
/// let call: MsgPackCall<(), u64> = MsgPackCall::new("version", ());
/// let version = client.invoke(call).await?;
///
/// // Fail over without touching the callers holding `client`
/// client.set_delegate(factory.sync_client("10.0.0.2:9090".parse()?));
/// # let _ = version;
/// # Ok(())
/// # }
/// ```
pub struct DelegatingClient<I> {
    delegate: RwLock<Arc<I>>,
}

impl<I: Invoke> DelegatingClient<I> {
    pub fn new(delegate: I) -> Self {
        Self {
            delegate: RwLock::new(Arc::new(delegate)),
        }
    }

    pub fn delegate(&self) -> Arc<I> {
        self.delegate.read().clone()
    }

    /// Replace the delegate, returning the previous one.
    pub fn set_delegate(&self, delegate: I) -> Arc<I> {
        std::mem::replace(&mut *self.delegate.write(), Arc::new(delegate))
    }
}

impl<I: Invoke> Invoke for DelegatingClient<I> {
    fn invoke<C: Call>(&self, call: C) -> impl Future<Output = Result<C::Response>> + Send {
        let delegate = self.delegate();
        async move { delegate.invoke(call).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::MsgPackCall;
    use crate::error::MuxError;

    /// Answers every call with the `Remote` error carrying its name.
    struct Named(&'static str);

    impl Invoke for Named {
        fn invoke<C: Call>(&self, _call: C) -> impl Future<Output = Result<C::Response>> + Send {
            let name = self.0;
            async move { Err(MuxError::Remote(name.to_string())) }
        }
    }

    fn call() -> MsgPackCall<(), ()> {
        MsgPackCall::new("ping", ())
    }

    #[tokio::test]
    async fn test_forwards_to_current_delegate() {
        let client = DelegatingClient::new(Named("first"));
        assert!(matches!(client.invoke(call()).await, Err(MuxError::Remote(n)) if n == "first"));

        let previous = client.set_delegate(Named("second"));
        assert_eq!(previous.0, "first");
        assert!(matches!(client.invoke(call()).await, Err(MuxError::Remote(n)) if n == "second"));
    }
}
