use futures::StreamExt;
use tracing::{debug, warn};

use parlor_core::frames::Frame;
use parlor_core::ids::{MessageId, SessionId};
use parlor_core::messages::ChatMessage;
use parlor_core::provider::{ChatProvider, PromptContext};
use parlor_core::stream::ChunkEvent;

use crate::error::RoomError;
use crate::log::MessageLog;
use crate::registry::ConnectionRegistry;

/// Shown while the reply has not produced any text yet.
pub const PLACEHOLDER: &str = "…";

/// Final content of a reply whose stream failed before completing.
pub const INTERRUPTED_SENTINEL: &str = "[response interrupted]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Pending,
    Streaming,
    Finalized,
    Aborted,
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub message_id: MessageId,
    pub state: TurnState,
    pub content: String,
}

/// Drive one streamed reply end to end.
///
/// A placeholder `add` goes out first, then one `update` with a typing
/// marker per delta, then a final `update` without the marker once the
/// stream terminates. Only the terminal content is written durably; the
/// intermediate states exist on the wire only. A failed stream finalizes
/// with the interrupted sentinel rather than retrying.
pub async fn run_assistant_turn(
    provider: &dyn ChatProvider,
    log: &mut MessageLog,
    registry: &mut ConnectionRegistry,
    context: &PromptContext,
    reply_to: &MessageId,
    session_id: Option<&SessionId>,
) -> Result<TurnOutcome, RoomError> {
    let mut message = ChatMessage::assistant_text(MessageId::new(), PLACEHOLDER);
    message.reply_to = Some(reply_to.clone());
    message.session_id = session_id.cloned();

    let add = Frame::Add {
        message: message.clone(),
    };
    registry.broadcast(&add.to_json()?, None);

    let mut state = TurnState::Pending;
    let mut buffer = String::new();

    let mut stream = match provider.stream(context).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(kind = error.error_kind(), error = %error, "provider refused stream");
            return finalize(
                log,
                registry,
                message,
                INTERRUPTED_SENTINEL.to_string(),
                TurnState::Aborted,
            );
        }
    };

    while let Some(event) = stream.next().await {
        match event {
            ChunkEvent::Start => {
                state = TurnState::Streaming;
            }
            ChunkEvent::Delta { delta } => {
                state = TurnState::Streaming;
                buffer.push_str(&delta);
                message.content = buffer.clone();
                let update = Frame::Update {
                    message: message.clone(),
                    typing: Some(true),
                };
                registry.broadcast(&update.to_json()?, None);
            }
            ChunkEvent::Done { text } => {
                debug!(message_id = %message.id, chars = text.len(), "reply finalized");
                return finalize(log, registry, message, text, TurnState::Finalized);
            }
            ChunkEvent::Error { error } => {
                warn!(
                    kind = error.error_kind(),
                    retryable = error.is_retryable(),
                    error = %error,
                    "stream failed mid-reply"
                );
                return finalize(
                    log,
                    registry,
                    message,
                    INTERRUPTED_SENTINEL.to_string(),
                    TurnState::Aborted,
                );
            }
        }
    }

    warn!(?state, "stream ended without a terminal event");
    finalize(
        log,
        registry,
        message,
        INTERRUPTED_SENTINEL.to_string(),
        TurnState::Aborted,
    )
}

fn finalize(
    log: &mut MessageLog,
    registry: &mut ConnectionRegistry,
    mut message: ChatMessage,
    content: String,
    state: TurnState,
) -> Result<TurnOutcome, RoomError> {
    message.content = content;
    log.upsert(&message)?;

    let update = Frame::Update {
        message: message.clone(),
        typing: None,
    };
    registry.broadcast(&update.to_json()?, None);

    Ok(TurnOutcome {
        message_id: message.id,
        state,
        content: message.content,
    })
}
