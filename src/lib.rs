//! # muxwire
//!
//! Client transport for length-prefixed RPC over TCP.
//!
//! Many concurrent requests share each connection: every request carries a
//! sequence id and replies are matched back to their callers by that id, in
//! whatever order the server sends them.
//!
//! ## Architecture
//!
//! - **Framing**: 4-byte big-endian length prefix, then the body
//! - **Envelope**: message type, sequence id and method name at the front of
//!   every body
//! - **Channel**: one multiplexed connection with per-request send and
//!   receive timeouts and backpressure on both request count and bytes
//! - **Pool**: a fixed number of channels per endpoint, used round-robin and
//!   redialed on demand, optionally through a SOCKS4 proxy
//! - **Executor**: a bounded worker pool running response callbacks off the
//!   connection tasks
//! - **Adapters**: awaitable, callback and delegating clients over the pool
//!
//! ## Example
//!
//! ```no_run
//! use muxwire::{ClientFactory, MsgPackCall};
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let factory = ClientFactory::builder().build()?;
//!     let client = factory.sync_client("127.0.0.1:9090".parse()?);
//!
//!     let reply: String = client.call(MsgPackCall::new("echo", "hello")).await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod backpressure;
pub mod call;
pub mod channel;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod listener;
pub mod pool;
pub mod protocol;
pub mod sequence;
pub mod transport;

mod client;
mod timer;
mod writer;

pub use adapter::{AsyncClient, DelegatingClient, Invoke, SyncClient};
pub use call::{Call, MsgPackCall};
pub use channel::{ChannelConfig, MultiplexedChannel};
pub use client::{ClientFactory, ClientFactoryBuilder};
pub use config::ClientConfig;
pub use endpoint::Endpoint;
pub use error::{MuxError, Result};
pub use executor::ResponseExecutor;
pub use listener::{listener_fn, ResponseListener};
pub use pool::ConnectionPool;
pub use sequence::{SequenceCounter, SequenceRewriter};
