use serde::{Deserialize, Serialize};

use crate::messages::ChatMessage;

/// One protocol-level JSON message exchanged over a persistent connection.
///
/// `add` and `update` share the message shape; `update` carries an optional
/// `typing` marker on server-originated assistant streaming frames. `all` is
/// server-originated only, sent once per new connection before live traffic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Add {
        #[serde(flatten)]
        message: ChatMessage,
    },
    Update {
        #[serde(flatten)]
        message: ChatMessage,
        #[serde(skip_serializing_if = "Option::is_none")]
        typing: Option<bool>,
    },
    All {
        messages: Vec<ChatMessage>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has an empty message id")]
    EmptyId,

    #[error("frame has empty author name")]
    EmptyUser,
}

impl Frame {
    /// Parse and shape-validate an inbound frame. Fails closed: anything that
    /// does not decode to a known frame with a usable id is rejected.
    pub fn parse(raw: &str) -> Result<Frame, FrameError> {
        let frame: Frame =
            serde_json::from_str(raw).map_err(|e| FrameError::Malformed(e.to_string()))?;
        match &frame {
            Frame::Add { message } | Frame::Update { message, .. } => {
                if message.id.as_str().is_empty() {
                    return Err(FrameError::EmptyId);
                }
                if message.user.is_empty() {
                    return Err(FrameError::EmptyUser);
                }
            }
            Frame::All { .. } => {}
        }
        Ok(frame)
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Frame::Add { .. } => "add",
            Frame::Update { .. } => "update",
            Frame::All { .. } => "all",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MessageId;
    use crate::messages::Role;

    #[test]
    fn parse_add_frame() {
        let raw = r#"{"type":"add","id":"m1","content":"hi","user":"Alice","role":"user"}"#;
        let frame = Frame::parse(raw).unwrap();
        match frame {
            Frame::Add { message } => {
                assert_eq!(message.id.as_str(), "m1");
                assert_eq!(message.content, "hi");
                assert_eq!(message.role, Role::User);
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_frame_with_typing_marker() {
        let raw = r#"{"type":"update","id":"a1","content":"partial","user":"assistant","role":"assistant","typing":true}"#;
        let frame = Frame::parse(raw).unwrap();
        match frame {
            Frame::Update { typing, .. } => assert_eq!(typing, Some(true)),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(Frame::parse("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(
            Frame::parse(r#"{"type":"shout","id":"m1"}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn parse_rejects_missing_fields() {
        // No content/user/role — shape validation fails closed.
        assert!(Frame::parse(r#"{"type":"add","id":"m1"}"#).is_err());
    }

    #[test]
    fn parse_rejects_empty_id() {
        let raw = r#"{"type":"add","id":"","content":"hi","user":"Alice","role":"user"}"#;
        assert!(matches!(Frame::parse(raw), Err(FrameError::EmptyId)));
    }

    #[test]
    fn all_frame_serializes_messages_in_order() {
        let frame = Frame::All {
            messages: vec![
                crate::messages::ChatMessage::user_text(MessageId::from_raw("m1"), "Alice", "a"),
                crate::messages::ChatMessage::user_text(MessageId::from_raw("m2"), "Bob", "b"),
            ],
        };
        let json = frame.to_json().unwrap();
        let pos1 = json.find("m1").unwrap();
        let pos2 = json.find("m2").unwrap();
        assert!(pos1 < pos2);
        assert!(json.contains("\"type\":\"all\""));
    }

    #[test]
    fn typing_marker_absent_when_none() {
        let frame = Frame::Update {
            message: crate::messages::ChatMessage::assistant_text(
                MessageId::from_raw("a1"),
                "done",
            ),
            typing: None,
        };
        let json = frame.to_json().unwrap();
        assert!(!json.contains("typing"));
    }

    #[test]
    fn wire_roundtrip() {
        let raw = r#"{"type":"add","id":"m1","content":"hi","user":"Alice","role":"user","session_id":"sess_1","attachments":["https://cdn/x.png"]}"#;
        let frame = Frame::parse(raw).unwrap();
        let json = frame.to_json().unwrap();
        let again = Frame::parse(&json).unwrap();
        match again {
            Frame::Add { message } => {
                assert_eq!(message.attachments, vec!["https://cdn/x.png"]);
                assert_eq!(message.session_id.as_ref().unwrap().as_str(), "sess_1");
            }
            other => panic!("expected add, got {other:?}"),
        }
    }
}
