//! Opens TCP connections and turns them into multiplexed channels.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use muxwire::transport::{Dialer, DialerConfig};
//! use muxwire::Endpoint;
//!
//! # async fn run() -> muxwire::Result<()> {
//! let dialer = Dialer::new(DialerConfig::default());
//! let endpoint: Endpoint = "127.0.0.1:9090".parse()?;
//! let channel = dialer.connect(&endpoint, Duration::from_secs(3)).await?;
//! assert!(channel.is_open());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use super::socks4;
use crate::channel::{ChannelConfig, MultiplexedChannel};
use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result};
use crate::executor::ResponseExecutor;

/// How connections are opened and what limits their channels get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerConfig {
    pub channel: ChannelConfig,
    /// Route every connection through this SOCKS4 proxy.
    pub socks_proxy: Option<Endpoint>,
    pub tcp_nodelay: bool,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            socks_proxy: None,
            tcp_nodelay: true,
        }
    }
}

/// Dials endpoints and starts a [`MultiplexedChannel`] on each connection.
///
/// Every channel it opens shares one [`ResponseExecutor`].
#[derive(Debug, Clone)]
pub struct Dialer {
    config: Arc<DialerConfig>,
    executor: ResponseExecutor,
}

impl Dialer {
    pub fn new(config: DialerConfig) -> Self {
        Self::with_executor(config, ResponseExecutor::default())
    }

    pub fn with_executor(config: DialerConfig, executor: ResponseExecutor) -> Self {
        Self {
            config: Arc::new(config),
            executor,
        }
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    pub fn executor(&self) -> &ResponseExecutor {
        &self.executor
    }

    /// Connect to `endpoint`, through the proxy if one is configured.
    ///
    /// Fails with `ConnectTimeout` if the TCP connect and proxy handshake
    /// together take longer than `connect_timeout`. A connection still in
    /// progress at that point is dropped.
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<MultiplexedChannel> {
        let stream = match tokio::time::timeout(connect_timeout, self.open_stream(endpoint)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(MuxError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout: connect_timeout,
                });
            }
        };

        if self.config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let (reader, writer) = stream.into_split();
        Ok(MultiplexedChannel::with_executor(
            reader,
            writer,
            endpoint.clone(),
            &self.config.channel,
            self.executor.clone(),
        ))
    }

    async fn open_stream(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        match &self.config.socks_proxy {
            None => connect_tcp(endpoint).await,
            Some(proxy) => {
                let mut stream = connect_tcp(proxy).await?;
                socks4::handshake(&mut stream, endpoint).await?;
                tracing::debug!("SOCKS4 proxy {} connected to {}", proxy, endpoint);
                Ok(stream)
            }
        }
    }
}

async fn connect_tcp(endpoint: &Endpoint) -> Result<TcpStream> {
    TcpStream::connect((endpoint.host(), endpoint.port()))
        .await
        .map_err(|e| MuxError::ConnectFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_connect_opens_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let channel = Dialer::new(DialerConfig::default())
            .connect(&endpoint, Duration::from_secs(1))
            .await
            .unwrap();

        let _held = accept.await.unwrap();
        assert!(channel.is_open());
        assert_eq!(channel.endpoint(), &endpoint);
        channel.close();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        drop(listener);

        let result = Dialer::new(DialerConfig::default())
            .connect(&endpoint, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(MuxError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_silent_proxy_times_out() {
        // Accepts but never answers the handshake
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_endpoint = Endpoint::from(proxy.local_addr().unwrap());
        tokio::spawn(async move {
            let (_held, _) = proxy.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let dialer = Dialer::new(DialerConfig {
            socks_proxy: Some(proxy_endpoint),
            ..DialerConfig::default()
        });
        let start = Instant::now();
        let result = dialer
            .connect(&Endpoint::new("127.0.0.1", 1), Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(MuxError::ConnectTimeout { .. })));
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
