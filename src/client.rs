//! Client factory and builder.
//!
//! The [`ClientFactoryBuilder`] provides a fluent API for configuring limits,
//! timeouts and the proxy. The resulting [`ClientFactory`] owns one
//! [`ConnectionPool`] and one sequence counter, and hands out clients bound
//! to individual endpoints:
//! 1. Build the factory (inside a tokio runtime)
//! 2. Create a client per endpoint
//! 3. Calls dial lazily and share the pooled channels
//!
//! # Example
//!
//! ```no_run
//! use muxwire::{ClientFactory, MsgPackCall};
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let factory = ClientFactory::builder()
//!         .channels_per_endpoint(2)
//!         .max_pending_requests(500)
//!         .build()?;
//!
//!     let client = factory.sync_client("127.0.0.1:9090".parse()?);
//!     let sum: i64 = client.call(MsgPackCall::new("add", (2, 3))).await?;
//!     assert_eq!(sum, 5);
//!
//!     factory.close();
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::adapter::{
    AsyncClient, ClientCore, DelegatingClient, Invoke, RequestEncoder, SyncClient,
};
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::executor::ResponseExecutor;
use crate::pool::ConnectionPool;
use crate::sequence::{SequenceCounter, SequenceRewriter};
use crate::transport::Dialer;

/// Builder for configuring and creating a [`ClientFactory`].
pub struct ClientFactoryBuilder {
    config: ClientConfig,
    counter: Option<Arc<SequenceCounter>>,
    runtime: Option<Handle>,
}

impl ClientFactoryBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            counter: None,
            runtime: None,
        }
    }

    /// Replace every setting at once.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how many channels each endpoint spreads requests over.
    ///
    /// Default: 1
    pub fn channels_per_endpoint(mut self, count: usize) -> Self {
        self.config.channels_per_endpoint = count;
        self
    }

    /// Set the maximum number of in-flight requests per channel.
    ///
    /// Default: 2000
    pub fn max_pending_requests(mut self, limit: usize) -> Self {
        self.config.max_pending_requests = limit;
        self
    }

    /// Set the maximum bytes of in-flight request frames per channel.
    ///
    /// Default: 200 MiB
    pub fn max_pending_bytes(mut self, limit: usize) -> Self {
        self.config.max_pending_bytes = limit;
        self
    }

    /// Set the maximum frame size. Frames up to this plus 1024 bytes of
    /// envelope slack are accepted in both directions.
    ///
    /// Default: 16 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the default send and receive timeout for new clients.
    ///
    /// Default: 10s
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout_ms = saturating_millis(timeout);
        self
    }

    /// Set the default connect timeout for new clients.
    ///
    /// Default: 3s
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = saturating_millis(timeout);
        self
    }

    /// Route every connection through a SOCKS4 proxy.
    pub fn socks_proxy(mut self, proxy: Endpoint) -> Self {
        self.config.socks_proxy = Some(proxy);
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    /// Set how many threads run response callbacks for the whole factory.
    ///
    /// Default: 8
    pub fn response_workers(mut self, workers: usize) -> Self {
        self.config.response_workers = workers;
        self
    }

    /// Share a sequence counter with other factories.
    pub fn sequence_counter(mut self, counter: Arc<SequenceCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Runtime used by [`SyncClient::call_blocking`]. Defaults to the
    /// runtime `build` is called on.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<ClientFactory> {
        self.config.validate()?;

        let executor = ResponseExecutor::new(self.config.response_workers);
        let dialer = Dialer::with_executor(self.config.dialer_config(), executor);
        let pool = ConnectionPool::new(dialer, self.config.channels_per_endpoint);
        let counter = self.counter.unwrap_or_default();
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());

        tracing::debug!(
            "Client factory ready: {} channel(s) per endpoint, {} pending requests per channel",
            self.config.channels_per_endpoint,
            self.config.max_pending_requests
        );

        Ok(ClientFactory {
            pool,
            config: self.config,
            rewriter: SequenceRewriter::new(counter),
            runtime,
        })
    }
}

impl Default for ClientFactoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Creates endpoint-bound clients over one shared connection pool.
pub struct ClientFactory {
    pool: ConnectionPool,
    config: ClientConfig,
    rewriter: SequenceRewriter,
    runtime: Option<Handle>,
}

impl ClientFactory {
    pub fn builder() -> ClientFactoryBuilder {
        ClientFactoryBuilder::new()
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        ClientFactoryBuilder::new().config(config).build()
    }

    /// Client for `endpoint` using the configured timeouts.
    pub fn sync_client(&self, endpoint: Endpoint) -> SyncClient {
        self.sync_client_with_timeouts(
            endpoint,
            self.config.socket_timeout(),
            self.config.connect_timeout(),
        )
    }

    pub fn sync_client_with_timeouts(
        &self,
        endpoint: Endpoint,
        socket_timeout: Duration,
        connect_timeout: Duration,
    ) -> SyncClient {
        SyncClient::new(
            self.core(endpoint, socket_timeout, connect_timeout),
            self.runtime.clone(),
        )
    }

    /// Callback-style client for `endpoint` using the configured timeouts.
    pub fn async_client(&self, endpoint: Endpoint) -> AsyncClient {
        self.async_client_with_timeouts(
            endpoint,
            self.config.socket_timeout(),
            self.config.connect_timeout(),
        )
    }

    pub fn async_client_with_timeouts(
        &self,
        endpoint: Endpoint,
        socket_timeout: Duration,
        connect_timeout: Duration,
    ) -> AsyncClient {
        AsyncClient::new(self.core(endpoint, socket_timeout, connect_timeout))
    }

    /// Wrap `delegate` so it can be swapped later.
    pub fn delegating_client<I: Invoke>(&self, delegate: I) -> DelegatingClient<I> {
        DelegatingClient::new(delegate)
    }

    /// Change the number of channels used for `endpoint`.
    pub fn set_channel_count(&self, endpoint: &Endpoint, count: usize) {
        self.pool.set_channel_count(endpoint, count);
    }

    pub fn channel_count(&self, endpoint: &Endpoint) -> usize {
        self.pool.channel_count(endpoint)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sequence_counter(&self) -> &Arc<SequenceCounter> {
        self.rewriter.counter()
    }

    /// Close every pooled channel. Pending requests fail with a channel
    /// error and later calls fail with `PoolExhausted`.
    pub fn close(&self) {
        self.pool.close();
    }

    fn core(&self, endpoint: Endpoint, socket_timeout: Duration, connect_timeout: Duration) -> ClientCore {
        ClientCore::new(
            self.pool.clone(),
            endpoint,
            RequestEncoder::new(self.rewriter.clone(), self.config.max_frame_size),
            socket_timeout,
            connect_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;

    #[test]
    fn test_builder_validates() {
        let result = ClientFactory::builder().max_pending_requests(0).build();
        assert!(matches!(result, Err(MuxError::Config(_))));
    }

    #[test]
    fn test_huge_timeouts_saturate() {
        let factory = ClientFactory::builder()
            .socket_timeout(Duration::MAX)
            .connect_timeout(Duration::from_secs(u64::MAX))
            .build()
            .unwrap();

        assert_eq!(factory.config().socket_timeout_ms, u64::MAX);
        assert_eq!(factory.config().connect_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_response_workers_reach_dialer() {
        let factory = ClientFactory::builder().response_workers(3).build().unwrap();
        assert_eq!(factory.pool().dialer().executor().max_workers(), 3);

        let result = ClientFactory::builder().response_workers(0).build();
        assert!(matches!(result, Err(MuxError::Config(_))));
    }

    #[test]
    fn test_no_runtime_outside_tokio() {
        let factory = ClientFactory::builder().build().unwrap();
        let client = factory.sync_client(Endpoint::new("127.0.0.1", 1));

        let call: crate::MsgPackCall<(), ()> = crate::MsgPackCall::new("ping", ());
        assert!(matches!(client.call_blocking(call), Err(MuxError::Config(_))));
    }

    #[tokio::test]
    async fn test_clients_share_counter() {
        let counter = Arc::new(SequenceCounter::starting_at(7));
        let factory = ClientFactory::builder()
            .sequence_counter(counter.clone())
            .socket_timeout(Duration::from_millis(250))
            .build()
            .unwrap();

        assert!(Arc::ptr_eq(factory.sequence_counter(), &counter));

        let client = factory.sync_client(Endpoint::new("127.0.0.1", 1));
        assert_eq!(client.socket_timeout(), Duration::from_millis(250));
        assert_eq!(client.connect_timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_channel_count() {
        let factory = ClientFactory::builder().channels_per_endpoint(3).build().unwrap();
        let endpoint = Endpoint::new("127.0.0.1", 1);

        assert_eq!(factory.channel_count(&endpoint), 3);
        factory.set_channel_count(&endpoint, 5);
        assert_eq!(factory.channel_count(&endpoint), 5);
    }

    #[tokio::test]
    async fn test_closed_factory_rejects_calls() {
        let factory = ClientFactory::builder().build().unwrap();
        factory.close();

        let client = factory.sync_client(Endpoint::new("127.0.0.1", 1));
        let call: crate::MsgPackCall<(), ()> = crate::MsgPackCall::new("ping", ());
        assert!(matches!(client.call(call).await, Err(MuxError::PoolExhausted(_))));
    }
}
