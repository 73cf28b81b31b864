//! Frames exchanged over the per-conversation duplex channel.
//!
//! Every frame is a JSON object with a `type` discriminator. Frame types the
//! client does not know are reported as [`InboundFrame::Unknown`] so newer
//! backends can add events without breaking older clients.

use serde::{Deserialize, Serialize};

use crate::models::{ClientKey, Message, MessageId, UserId};

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new confirmed message, possibly the echo of one we sent.
    ChatMessage { message: Message },
    /// A counterpart started or stopped composing.
    TypingIndicator {
        user_id: UserId,
        #[serde(default)]
        user_name: Option<String>,
        is_typing: bool,
    },
    MessageEdit {
        message_id: MessageId,
        content: String,
    },
    MessageDelete { message_id: MessageId },
    UserStatus { user_id: UserId, is_online: bool },
}

impl ServerEvent {
    /// Discriminators this client understands.
    pub const KNOWN_TYPES: [&'static str; 5] = [
        "chat_message",
        "typing_indicator",
        "message_edit",
        "message_delete",
        "user_status",
    ];
}

/// Requests sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    ChatMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<MessageId>,
        client_key: ClientKey,
    },
    TypingIndicator { is_typing: bool },
}

impl ClientCommand {
    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Result of decoding a text frame from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Event(ServerEvent),
    Unknown { kind: String },
}

/// A frame that could not be decoded at all.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("malformed `{kind}` frame: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode a text frame received from the server.
pub fn decode_server_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(FrameError::Json)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();

    if !ServerEvent::KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(InboundFrame::Unknown { kind });
    }

    serde_json::from_value(value)
        .map(InboundFrame::Event)
        .map_err(|source| FrameError::Malformed { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_typing_indicator() {
        let frame = decode_server_frame(
            r#"{"type":"typing_indicator","user_id":"U1","user_name":"Uma","is_typing":true}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::Event(ServerEvent::TypingIndicator {
                user_id: "U1".into(),
                user_name: Some("Uma".into()),
                is_typing: true,
            })
        );
    }

    #[test]
    fn decodes_chat_message_with_numeric_ids() {
        let frame = decode_server_frame(
            r#"{"type":"chat_message","message":{"id":11,"conversation":4,
                "sender":{"id":2,"name":"Ann"},"content":"hello",
                "created_at":"2026-03-01T09:30:00Z"}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Event(ServerEvent::ChatMessage { message }) => {
                assert_eq!(message.id.as_str(), "11");
                assert_eq!(message.content, "hello");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_reported_not_rejected() {
        let frame = decode_server_frame(r#"{"type":"reaction_added","emoji":"+1"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Unknown {
                kind: "reaction_added".into()
            }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode_server_frame("not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            decode_server_frame(r#"{"kind":"chat_message"}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            decode_server_frame(r#"{"type":"message_delete"}"#),
            Err(FrameError::Malformed { .. })
        ));
    }

    #[test]
    fn commands_carry_type_discriminator() {
        let json = ClientCommand::TypingIndicator { is_typing: false }
            .to_frame()
            .unwrap();
        assert_eq!(json, r#"{"type":"typing_indicator","is_typing":false}"#);

        let key = ClientKey::generate();
        let value: serde_json::Value = serde_json::from_str(
            &ClientCommand::ChatMessage {
                content: "hi".into(),
                parent_message_id: None,
                client_key: key,
            }
            .to_frame()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["client_key"], key.to_string());
        assert!(value.get("parent_message_id").is_none());
    }
}
