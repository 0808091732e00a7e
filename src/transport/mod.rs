//! Transport module - connection establishment.
//!
//! Provides:
//! - TCP dialing with a connect deadline
//! - Optional SOCKS4/SOCKS4a proxy handshake
//! - Hand-off of the connected stream to a [`MultiplexedChannel`](crate::MultiplexedChannel)

mod dialer;
mod socks4;

pub use dialer::{Dialer, DialerConfig};
