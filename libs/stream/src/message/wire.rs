//! Versioned binary form of a message

use super::{Message, Payload};
use crate::context::MessageContext;
use crate::error::{Result, StreamError};
use crate::node::Node;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Leading byte of every encoded message
pub const WIRE_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct WireMessage {
    request_class: String,
    context: MessageContext,
    payload: WirePayload,
}

#[derive(Serialize, Deserialize)]
enum WirePayload {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Node(Node),
}

impl Message {
    /// Encode content and context. One-shot content is preserved first;
    /// disk-backed and supplied content is inlined.
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        if !self.is_repeatable() {
            self.preserve()?;
        }
        let payload = match self.payload() {
            Payload::Null => WirePayload::Null,
            Payload::Text(text) => WirePayload::Text(text.clone()),
            Payload::Node(node) => WirePayload::Node(Node::clone(node)),
            Payload::Bytes(bytes) => WirePayload::Bytes(bytes.to_vec()),
            _ if self.is_binary() => {
                WirePayload::Bytes(self.as_bytes(None)?.map(|b| b.to_vec()).unwrap_or_default())
            }
            _ => WirePayload::Text(self.as_text(None)?.unwrap_or_default()),
        };

        let wire = WireMessage {
            request_class: self.request_class.clone(),
            context: self.context.clone(),
            payload,
        };
        let mut out = vec![WIRE_VERSION];
        bincode::serialize_into(&mut out, &wire)?;
        Ok(out)
    }

    /// Rebuild a message from [`Message::encode`] output
    pub fn decode(encoded: &[u8]) -> Result<Message> {
        let (version, body) = encoded
            .split_first()
            .ok_or_else(|| StreamError::encoding("empty message encoding"))?;
        if *version != WIRE_VERSION {
            return Err(StreamError::encoding(format!(
                "unsupported message encoding version {}",
                version
            )));
        }

        let wire: WireMessage = bincode::deserialize(body)?;
        let payload = match wire.payload {
            WirePayload::Null => Payload::Null,
            WirePayload::Text(text) => Payload::Text(text),
            WirePayload::Bytes(bytes) => Payload::Bytes(Bytes::from(bytes)),
            WirePayload::Node(node) => Payload::Node(Arc::new(node)),
        };
        let mut message = Message::with_payload(payload, &wire.request_class);
        message.context = wire.context;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stream_is_preserved_before_encoding() {
        let mut message = Message::from_byte_stream(Cursor::new(b"stream body".to_vec()))
            .with_context(MessageContext::new().with_name("body.bin").with_size(11));

        let encoded = message.encode().unwrap();
        let mut decoded = Message::decode(&encoded).unwrap();

        assert!(decoded.is_binary());
        assert_eq!(decoded.context().name(), Some("body.bin"));
        assert_eq!(decoded.as_bytes(None).unwrap().unwrap().as_ref(), b"stream body");
        // the original is still readable
        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("stream body"));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut encoded = Message::from_text("x").encode().unwrap();
        encoded[0] = 9;

        assert!(matches!(Message::decode(&encoded), Err(StreamError::Encoding(_))));
        assert!(matches!(Message::decode(&[]), Err(StreamError::Encoding(_))));
    }

    #[test]
    fn test_node_survives_encoding() {
        let node = Node::new("a").with_attribute("k", "v").with_text("t");
        let encoded = Message::from_node(node.clone()).encode().unwrap();

        assert_eq!(Message::decode(&encoded).unwrap().as_node().unwrap(), Some(node));
    }
}
