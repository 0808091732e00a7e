//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written as maps (`write_named`) so that servers can
//! decode them by field name instead of position.

use bytes::{BufMut, BytesMut};

use crate::error::Result;

/// MessagePack codec for call arguments and results.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value directly onto the end of a request buffer.
    #[inline]
    pub fn encode_into<T: serde::Serialize + ?Sized>(value: &T, buf: &mut BytesMut) -> Result<()> {
        let mut writer = (&mut *buf).writer();
        rmp_serde::encode::write_named(&mut writer, value)?;
        Ok(())
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Transfer {
        account: u32,
        memo: String,
        urgent: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Transfer {
            account: 42,
            memo: "rent".to_string(),
            urgent: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Transfer = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_written_as_map() {
        let encoded = MsgPackCodec::encode(&Transfer {
            account: 1,
            memo: String::new(),
            urgent: false,
        })
        .unwrap();

        // fixmap with 3 entries, not fixarray (0x93)
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::from(&b"head"[..]);
        MsgPackCodec::encode_into(&(1u8, "two"), &mut buf).unwrap();

        assert_eq!(&buf[..4], b"head");
        let decoded: (u8, String) = MsgPackCodec::decode(&buf[4..]).unwrap();
        assert_eq!(decoded, (1, "two".to_string()));
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Transfer> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(MuxError::MsgPackDecode(_))));
    }

    #[test]
    fn test_encode_decode_option() {
        let encoded = MsgPackCodec::encode(&None::<i32>).unwrap();
        assert_eq!(encoded, vec![0xc0]);
        let decoded: Option<i32> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, None);
    }
}
