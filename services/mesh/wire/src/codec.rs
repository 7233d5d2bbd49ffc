//! Encoding and decoding of message envelopes.
//!
//! The pipeline only relies on [`MessageCodec`]; [`CborCodec`] is the
//! default implementation and writes the envelope as a CBOR document.

use crate::error::CodecError;
use crate::message::Message;
use bytes::Bytes;
use tracing::trace;

/// Turns envelopes into transport bytes and back
pub trait MessageCodec: Send + Sync + std::fmt::Debug {
    /// Encode a message
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError>;

    /// Decode a message, preserving every field exactly
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// CBOR envelope codec
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl CborCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for CborCodec {
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        let mut buf = Vec::new();
        ciborium::into_writer(message, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
        trace!("Encoded {} envelope ({} bytes)", message.content.kind(), buf.len());
        Ok(Bytes::from(buf))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressable::{AddressableReference, Key};
    use crate::message::MessageTarget;
    use crate::node::NodeId;
    use crate::route::Route;

    #[test]
    fn test_envelope_preserves_fields() {
        let codec = CborCodec::new();
        let mut message = Message::invocation(
            AddressableReference::new("Greeter", Key::Guid(uuid::Uuid::new_v4())),
            "greet",
            vec![0, 1, 2, 255],
        );
        message.message_id = Some(-7);
        message.source = Some(NodeId::new("a", "ns"));
        message.target = Some(MessageTarget::RoutedUnicast(Route::new(vec![
            NodeId::new("b", "ns"),
            NodeId::new("c", "ns"),
        ])));

        let bytes = codec.encode(&message).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = CborCodec::new();
        assert!(matches!(codec.decode(&[]), Err(CodecError::Empty)));
        assert!(matches!(codec.decode(&[0xff, 0x00, 0x13]), Err(CodecError::Decode(_))));
    }
}
