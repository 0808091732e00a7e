//! Codec module - argument and result serialization.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map)
//!
//! Codecs are marker structs with static methods. Call descriptors
//! ([`MsgPackCall`](crate::call::MsgPackCall)) pick one at compile time.
//!
//! # Example
//!
//! ```
//! use muxwire::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
