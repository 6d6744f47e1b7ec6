//! Wire frames exchanged over the streaming connection.
//!
//! Every text frame in either direction has the same JSON shape:
//!
//! ```json
//! {"clientId": "c1", "messageId": 1, "payload": "What is duty?", "msgType": "client"}
//! ```
//!
//! Replies are built exclusively through [`Correlation::reply`] so the
//! `(clientId, messageId)` pair of every outbound frame is copied from the
//! inbound frame that caused it.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

/// Direction marker carried on every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    #[default]
    Client,
    Server,
}

/// A single frame as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub client_id: String,
    pub message_id: i64,
    pub payload: String,
    /// Missing on the wire means `client`; the field is advisory for inbound frames.
    #[serde(default)]
    pub msg_type: MsgType,
    /// Set only on server frames that report a failed generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireMessage {
    pub fn to_json(&self) -> String {
        // Only strings, an integer and an enum: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A decoded client query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub correlation: Correlation,
    pub payload: String,
}

impl InboundMessage {
    /// Decode a raw text frame. Rejects malformed JSON, server frames and
    /// blank payloads.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let wire: WireMessage =
            serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if wire.msg_type != MsgType::Client {
            return Err(DecodeError::UnexpectedType(wire.msg_type));
        }
        if wire.payload.trim().is_empty() {
            return Err(DecodeError::EmptyPayload);
        }

        Ok(Self {
            correlation: Correlation {
                client_id: wire.client_id,
                message_id: wire.message_id,
            },
            payload: wire.payload,
        })
    }
}

/// The `(clientId, messageId)` pair tying replies to their request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Correlation {
    pub client_id: String,
    pub message_id: i64,
}

impl Correlation {
    pub fn new(client_id: impl Into<String>, message_id: i64) -> Self {
        Self {
            client_id: client_id.into(),
            message_id,
        }
    }

    /// A server frame carrying one completed sentence.
    pub fn reply(&self, sentence: impl Into<String>) -> OutboundMessage {
        OutboundMessage(WireMessage {
            client_id: self.client_id.clone(),
            message_id: self.message_id,
            payload: sentence.into(),
            msg_type: MsgType::Server,
            error: None,
        })
    }

    /// A server frame reporting that generation failed. Payload is empty.
    pub fn error_reply(&self, error: impl Into<String>) -> OutboundMessage {
        OutboundMessage(WireMessage {
            client_id: self.client_id.clone(),
            message_id: self.message_id,
            payload: String::new(),
            msg_type: MsgType::Server,
            error: Some(error.into()),
        })
    }
}

/// A server frame. Only constructible through [`Correlation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage(WireMessage);

impl OutboundMessage {
    pub fn to_json(&self) -> String {
        self.0.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_client_frame() {
        let raw = r#"{"clientId":"c1","messageId":1,"payload":"What is duty?","msgType":"client"}"#;
        let msg = InboundMessage::decode(raw).unwrap();
        assert_eq!(msg.correlation, Correlation::new("c1", 1));
        assert_eq!(msg.payload, "What is duty?");
    }

    #[test]
    fn decode_missing_msg_type_defaults_to_client() {
        let raw = r#"{"clientId":"c1","messageId":7,"payload":"hi"}"#;
        let msg = InboundMessage::decode(raw).unwrap();
        assert_eq!(msg.correlation.message_id, 7);
    }

    #[test]
    fn decode_rejects_server_frames() {
        let raw = r#"{"clientId":"c1","messageId":1,"payload":"x","msgType":"server"}"#;
        assert_eq!(
            InboundMessage::decode(raw),
            Err(DecodeError::UnexpectedType(MsgType::Server))
        );
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(matches!(
            InboundMessage::decode("{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"clientId":"c1","payload":"no id"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn decode_rejects_blank_payload() {
        let raw = r#"{"clientId":"c1","messageId":1,"payload":"   ","msgType":"client"}"#;
        assert_eq!(InboundMessage::decode(raw), Err(DecodeError::EmptyPayload));
    }

    #[test]
    fn reply_copies_correlation() {
        let corr = Correlation::new("c9", 42);
        let out = corr.reply("Done.");
        let json: serde_json::Value = serde_json::from_str(&out.to_json()).unwrap();
        assert_eq!(json["clientId"], "c9");
        assert_eq!(json["messageId"], 42);
        assert_eq!(json["payload"], "Done.");
        assert_eq!(json["msgType"], "server");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_reply_has_empty_payload() {
        let out = Correlation::new("c1", 3).error_reply("timeout");
        let json: serde_json::Value = serde_json::from_str(&out.to_json()).unwrap();
        assert_eq!(json["payload"], "");
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["messageId"], 3);
    }

    #[test]
    fn same_message_id_across_clients_is_distinct() {
        let a = Correlation::new("alice", 1);
        let b = Correlation::new("bob", 1);
        assert_ne!(a, b);
    }
}
