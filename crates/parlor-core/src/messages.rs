use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId};

/// Who authored a message. Immutable after creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Polarity label assigned by the sentiment tagger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Neutral => write!(f, "neutral"),
            Self::Negative => write!(f, "negative"),
        }
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown sentiment: {other}")),
        }
    }
}

/// One chat message in a room's ordered log.
///
/// The id is unique within a room and may be generated client-side.
/// Mutable fields (content, attachments, thread_id, reply_to, sentiment) are
/// replaced in place on update; the message keeps its original position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub user: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

impl ChatMessage {
    /// Convenience constructor for a plain user message.
    pub fn user_text(id: MessageId, user: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            user: user.into(),
            role: Role::User,
            content: content.into(),
            attachments: Vec::new(),
            session_id: None,
            user_id: None,
            thread_id: None,
            reply_to: None,
            sentiment: None,
        }
    }

    /// Convenience constructor for an assistant message.
    pub fn assistant_text(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            user: "assistant".into(),
            role: Role::Assistant,
            content: content.into(),
            attachments: Vec::new(),
            session_id: None,
            user_id: None,
            thread_id: None,
            reply_to: None,
            sentiment: None,
        }
    }

    /// Replace the mutable fields from another message with the same id.
    /// Role, author and ordinal position are preserved.
    pub fn apply_update(&mut self, update: &ChatMessage) {
        self.content = update.content.clone();
        self.attachments = update.attachments.clone();
        self.thread_id = update.thread_id.clone();
        self.reply_to = update.reply_to.clone();
        self.sentiment = update.sentiment;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrip() {
        for role in [Role::User, Role::Assistant] {
            let s = role.to_string();
            let parsed: Role = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn sentiment_roundtrip() {
        for s in [Sentiment::Positive, Sentiment::Neutral, Sentiment::Negative] {
            let parsed: Sentiment = s.to_string().parse().unwrap();
            assert_eq!(s, parsed);
        }
    }

    #[test]
    fn unknown_role_rejected() {
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn apply_update_preserves_identity() {
        let mut original = ChatMessage::user_text(MessageId::from_raw("m1"), "Alice", "hi");
        original.sentiment = Some(Sentiment::Neutral);

        let mut update = ChatMessage::user_text(MessageId::from_raw("m1"), "Mallory", "edited");
        update.role = Role::Assistant; // must not leak through
        update.sentiment = Some(Sentiment::Positive);

        original.apply_update(&update);
        assert_eq!(original.content, "edited");
        assert_eq!(original.user, "Alice");
        assert_eq!(original.role, Role::User);
        assert_eq!(original.sentiment, Some(Sentiment::Positive));
    }

    #[test]
    fn serde_skips_empty_optionals() {
        let msg = ChatMessage::user_text(MessageId::from_raw("m1"), "Alice", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("session_id").is_none());
        assert!(json.get("attachments").is_none());
        assert_eq!(json["role"], "user");
    }
}
