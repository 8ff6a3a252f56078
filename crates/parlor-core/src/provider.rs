use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::messages::{ChatMessage, Role};
use crate::stream::ChunkEvent;

/// One turn of conversational grounding sent to the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptTurn {
    pub role: Role,
    pub content: String,
}

/// Conversation history payload handed to the provider: the room's bounded
/// window plus the requesting session's message subset. Content-shaping only;
/// the provider treats it as opaque grounding.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PromptContext {
    pub turns: Vec<PromptTurn>,
}

impl PromptContext {
    pub fn empty() -> Self {
        Self { turns: Vec::new() }
    }

    /// Build grounding from the room window, appending the session subset
    /// so the session's own thread carries extra weight.
    pub fn from_history<'a>(
        room_window: impl IntoIterator<Item = &'a ChatMessage>,
        session_subset: impl IntoIterator<Item = &'a ChatMessage>,
    ) -> Self {
        let mut turns: Vec<PromptTurn> = room_window
            .into_iter()
            .map(|m| PromptTurn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        turns.extend(session_subset.into_iter().map(|m| PromptTurn {
            role: m.role,
            content: m.content.clone(),
        }));
        Self { turns }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Trait implemented by each streaming text-generation provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(
        &self,
        context: &PromptContext,
    ) -> Result<Pin<Box<dyn Stream<Item = ChunkEvent> + Send>>, ProviderError>;

    /// Drain a full response into a single string. Used by the
    /// request/response HTTP surface (summary, suggestions), which has no use
    /// for incremental delivery.
    async fn complete(&self, context: &PromptContext) -> Result<String, ProviderError> {
        use futures::StreamExt;

        let mut stream = self.stream(context).await?;
        let mut buffer = String::new();
        while let Some(event) = stream.next().await {
            match event {
                ChunkEvent::Delta { delta } => buffer.push_str(&delta),
                ChunkEvent::Done { text } => return Ok(text),
                ChunkEvent::Error { error } => return Err(error),
                ChunkEvent::Start => {}
            }
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MessageId;

    #[test]
    fn context_from_history_orders_room_then_session() {
        let room = vec![
            ChatMessage::user_text(MessageId::from_raw("m1"), "Alice", "room one"),
            ChatMessage::assistant_text(MessageId::from_raw("a1"), "room two"),
        ];
        let session = vec![ChatMessage::user_text(
            MessageId::from_raw("m1"),
            "Alice",
            "session copy",
        )];

        let ctx = PromptContext::from_history(room.iter(), session.iter());
        assert_eq!(ctx.turns.len(), 3);
        assert_eq!(ctx.turns[0].content, "room one");
        assert_eq!(ctx.turns[1].role, Role::Assistant);
        assert_eq!(ctx.turns[2].content, "session copy");
    }

    #[test]
    fn empty_context() {
        assert!(PromptContext::empty().is_empty());
    }
}
