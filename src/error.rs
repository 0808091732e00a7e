//! Error types for muxwire.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Which leg of a request ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The frame was not written to the socket before the deadline.
    Send,
    /// The frame was written but no response arrived before the deadline.
    Receive,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Send => f.write_str("send request"),
            TimeoutKind::Receive => f.write_str("receive response"),
        }
    }
}

/// The in-flight budget that could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureKind {
    /// Too many requests awaiting a response.
    Slots,
    /// Too many request bytes awaiting a response.
    Bytes,
}

impl fmt::Display for BackpressureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpressureKind::Slots => f.write_str("request slots"),
            BackpressureKind::Bytes => f.write_str("byte budget"),
        }
    }
}

/// Main error type for all muxwire operations.
///
/// Cloneable so one disconnect cause can be handed to every pending request.
#[derive(Debug, Clone, Error)]
pub enum MuxError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The channel is not (or no longer) open.
    #[error("Not connected to {endpoint}")]
    NotConnected { endpoint: String },

    /// Dialing did not finish within the connect budget.
    #[error("Connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// Dialing failed outright (refused, unreachable, proxy rejection).
    #[error("Connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// In-flight limits could not be acquired in time.
    #[error("Backpressure: {kind} exhausted ({pending} pending requests)")]
    Backpressure {
        kind: BackpressureKind,
        pending: usize,
    },

    /// The frame could not be written to the socket.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The request deadline passed.
    #[error("Timed out waiting to {0}")]
    TimedOut(TimeoutKind),

    /// The channel failed or closed while the request was pending.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Encoded request exceeds the maximum frame size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Malformed or undecodable response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No channel can be handed out for the endpoint.
    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// The server answered with an exception reply.
    #[error("Remote error: {0}")]
    Remote(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(String),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(String),

    /// JSON error (configuration loading only).
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MuxError {
    /// True for send and receive timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MuxError::TimedOut(_) | MuxError::ConnectTimeout { .. })
    }
}

impl From<std::io::Error> for MuxError {
    fn from(err: std::io::Error) -> Self {
        MuxError::Io(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for MuxError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        MuxError::MsgPackEncode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MuxError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        MuxError::MsgPackDecode(err.to_string())
    }
}

impl From<serde_json::Error> for MuxError {
    fn from(err: serde_json::Error) -> Self {
        MuxError::Json(err.to_string())
    }
}

/// Result type alias using MuxError.
pub type Result<T> = std::result::Result<T, MuxError>;
