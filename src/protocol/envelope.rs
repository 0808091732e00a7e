//! Message envelope carried at the start of every frame body.
//!
//! ```text
//! ┌──────┬──────────┬──────────┬──────────────┐
//! │ Type │ Seq ID   │ Name len │ Method name  │
//! │ 1 B  │ uint32 BE│ uint16 BE│ UTF-8        │
//! └──────┴──────────┴──────────┴──────────────┘
//! ```
//!
//! The sequence id sits at a fixed offset so responses can be correlated
//! without decoding the rest of the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MuxError, Result};

/// Size of the fixed part of the envelope (type + seq id + name length).
pub const ENVELOPE_FIXED_SIZE: usize = 7;

/// Kind of message carried in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(MuxError::Protocol(format!(
                "Unknown message type: {}",
                other
            ))),
        }
    }
}

/// Decoded message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub message_type: MessageType,
    pub sequence_id: u32,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, message_type: MessageType, sequence_id: u32) -> Self {
        Self {
            name: name.into(),
            message_type,
            sequence_id,
        }
    }

    /// Encoded size of this envelope.
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_FIXED_SIZE + self.name.len()
    }

    /// Append the envelope to `buf`.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the method name is longer than 65535 bytes.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let name_len = u16::try_from(self.name.len()).map_err(|_| {
            MuxError::Protocol(format!(
                "Method name too long: {} bytes",
                self.name.len()
            ))
        })?;
        buf.reserve(self.encoded_len());
        buf.put_u8(self.message_type as u8);
        buf.put_u32(self.sequence_id);
        buf.put_u16(name_len);
        buf.put_slice(self.name.as_bytes());
        Ok(())
    }

    /// Decode an envelope from the front of `body`, advancing past it.
    pub fn decode(body: &mut Bytes) -> Result<Self> {
        if body.len() < ENVELOPE_FIXED_SIZE {
            return Err(MuxError::Protocol(format!(
                "Envelope truncated: {} bytes",
                body.len()
            )));
        }
        let message_type = MessageType::try_from(body[0])?;
        body.advance(1);
        let sequence_id = body.get_u32();
        let name_len = body.get_u16() as usize;
        if body.len() < name_len {
            return Err(MuxError::Protocol(format!(
                "Method name truncated: expected {} bytes, got {}",
                name_len,
                body.len()
            )));
        }
        let name_bytes = body.split_to(name_len);
        let name = std::str::from_utf8(&name_bytes)
            .map_err(|e| MuxError::Protocol(format!("Method name is not UTF-8: {}", e)))?
            .to_owned();

        Ok(Self {
            name,
            message_type,
            sequence_id,
        })
    }
}

/// Read the sequence id from a frame body without consuming it.
pub fn peek_sequence_id(body: &[u8]) -> Result<u32> {
    if body.len() < ENVELOPE_FIXED_SIZE {
        return Err(MuxError::Protocol(format!(
            "Cannot read sequence id from {} byte body",
            body.len()
        )));
    }
    MessageType::try_from(body[0])?;
    Ok(u32::from_be_bytes([body[1], body[2], body[3], body[4]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let header = MessageHeader::new("ping", MessageType::Call, 0x0A0B0C0D);
        let mut buf = BytesMut::new();
        header.encode_into(&mut buf).unwrap();

        assert_eq!(buf.len(), header.encoded_len());
        assert_eq!(&buf[..7], &[1, 0x0A, 0x0B, 0x0C, 0x0D, 0, 4]);
        assert_eq!(&buf[7..], b"ping");
    }

    #[test]
    fn test_decode_leaves_arguments() {
        let mut buf = BytesMut::new();
        MessageHeader::new("sum", MessageType::Reply, 9)
            .encode_into(&mut buf)
            .unwrap();
        buf.put_slice(b"args");

        let mut body = buf.freeze();
        let header = MessageHeader::decode(&mut body).unwrap();

        assert_eq!(header.name, "sum");
        assert_eq!(header.message_type, MessageType::Reply);
        assert_eq!(header.sequence_id, 9);
        assert_eq!(&body[..], b"args");
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = BytesMut::new();
        MessageHeader::new("x", MessageType::Reply, 77)
            .encode_into(&mut buf)
            .unwrap();
        assert_eq!(peek_sequence_id(&buf).unwrap(), 77);
        assert_eq!(buf.len(), ENVELOPE_FIXED_SIZE + 1);
    }

    #[test]
    fn test_peek_rejects_garbage() {
        assert!(matches!(peek_sequence_id(b"abc"), Err(MuxError::Protocol(_))));
        assert!(matches!(
            peek_sequence_id(&[9, 0, 0, 0, 1, 0, 0]),
            Err(MuxError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_truncated_name() {
        let mut body = Bytes::from_static(&[2, 0, 0, 0, 1, 0, 10, b'a']);
        assert!(matches!(
            MessageHeader::decode(&mut body),
            Err(MuxError::Protocol(_))
        ));
    }
}
