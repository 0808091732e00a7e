//! Client configuration.
//!
//! [`ClientConfig`] holds every tunable of a [`ClientFactory`](crate::ClientFactory).
//! It can be built in code, through the factory builder, or loaded from JSON:
//!
//! ```
//! use muxwire::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{
//!     "channels_per_endpoint": 4,
//!     "socket_timeout_ms": 2500,
//!     "socks_proxy": "10.1.0.7:1080"
//! }"#).unwrap();
//!
//! assert_eq!(config.channels_per_endpoint, 4);
//! assert_eq!(config.max_pending_requests, 2000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backpressure::{
    DEFAULT_MAX_PENDING_BYTES, DEFAULT_MAX_PENDING_REQUESTS, MAX_PENDING_BYTES_LIMIT,
};
use crate::channel::ChannelConfig;
use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result};
use crate::executor::DEFAULT_RESPONSE_WORKERS;
use crate::pool::DEFAULT_CHANNELS_PER_ENDPOINT;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::DialerConfig;

/// Default bound on sending a request and on waiting for its reply.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on opening a channel.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub channels_per_endpoint: usize,
    pub max_pending_requests: usize,
    pub max_pending_bytes: usize,
    pub socket_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_frame_size: usize,
    pub socks_proxy: Option<Endpoint>,
    pub tcp_nodelay: bool,
    /// Threads running response callbacks, shared by every channel.
    pub response_workers: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channels_per_endpoint: DEFAULT_CHANNELS_PER_ENDPOINT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            socks_proxy: None,
            tcp_nodelay: true,
            response_workers: DEFAULT_RESPONSE_WORKERS,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pending_requests == 0 {
            return Err(MuxError::Config("max_pending_requests must be at least 1".into()));
        }
        if self.max_pending_bytes == 0 || self.max_pending_bytes > MAX_PENDING_BYTES_LIMIT {
            return Err(MuxError::Config(format!(
                "max_pending_bytes must be between 1 and {}",
                MAX_PENDING_BYTES_LIMIT
            )));
        }
        if self.max_frame_size == 0 {
            return Err(MuxError::Config("max_frame_size must be at least 1".into()));
        }
        if self.socket_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(MuxError::Config("timeouts must be non-zero".into()));
        }
        if self.response_workers == 0 {
            return Err(MuxError::Config("response_workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_pending_requests: self.max_pending_requests,
            max_pending_bytes: self.max_pending_bytes,
            max_frame_size: self.max_frame_size,
        }
    }

    pub fn dialer_config(&self) -> DialerConfig {
        DialerConfig {
            channel: self.channel_config(),
            socks_proxy: self.socks_proxy.clone(),
            tcp_nodelay: self.tcp_nodelay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.channels_per_endpoint, 1);
        assert_eq!(config.max_pending_requests, 2000);
        assert_eq!(config.max_pending_bytes, 200 * 1024 * 1024);
        assert_eq!(config.socket_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert!(config.tcp_nodelay);
        assert_eq!(config.response_workers, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = ClientConfig::from_json(
            r#"{"max_pending_bytes": 1024, "socks_proxy": "proxy.internal:1080"}"#,
        )
        .unwrap();

        assert_eq!(config.max_pending_bytes, 1024);
        assert_eq!(config.socks_proxy, Some(Endpoint::new("proxy.internal", 1080)));
        assert_eq!(config.socket_timeout_ms, 10_000);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let zero = ClientConfig::from_json(r#"{"max_pending_requests": 0}"#);
        assert!(matches!(zero, Err(MuxError::Config(_))));

        let no_workers = ClientConfig::from_json(r#"{"response_workers": 0}"#);
        assert!(matches!(no_workers, Err(MuxError::Config(_))));

        let malformed = ClientConfig::from_json("{not json");
        assert!(matches!(malformed, Err(MuxError::Json(_))));

        let bad_proxy = ClientConfig::from_json(r#"{"socks_proxy": "no-port"}"#);
        assert!(matches!(bad_proxy, Err(MuxError::Json(_))));
    }

    #[test]
    fn test_byte_budget_limit() {
        let config = ClientConfig {
            max_pending_bytes: MAX_PENDING_BYTES_LIMIT + 1,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(MuxError::Config(_))));
    }

    #[test]
    fn test_dialer_config() {
        let config = ClientConfig {
            max_frame_size: 4096,
            tcp_nodelay: false,
            ..ClientConfig::default()
        };
        let dialer = config.dialer_config();

        assert_eq!(dialer.channel.max_frame_size, 4096);
        assert!(!dialer.tcp_nodelay);
        assert!(dialer.socks_proxy.is_none());
    }
}
