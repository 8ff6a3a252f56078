use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use parlor_core::ids::{MessageId, RoomId, SessionId};
use parlor_core::messages::{ChatMessage, Role, Sentiment};
use parlor_core::provider::{PromptContext, PromptTurn};
use parlor_room::RoomError;
use parlor_store::ratings::RatingRepo;
use parlor_store::StoreError;

use crate::server::AppState;

const SUMMARY_INSTRUCTION: &str =
    "Summarize the conversation so far in two or three sentences, focusing on this visitor's questions and what was resolved.";
const SUGGESTIONS_INSTRUCTION: &str =
    "Suggest three short follow-up messages this visitor might send next. Reply with one suggestion per line, nothing else.";

// Aliases accept the camelCase keys some clients send.
#[derive(Deserialize)]
pub struct RateRequest {
    pub room: String,
    #[serde(alias = "messageId")]
    pub message_id: String,
    #[serde(alias = "userId")]
    pub user_id: String,
    pub rating: i64,
}

#[derive(Serialize)]
pub struct RateResponse {
    pub id: String,
}

#[derive(Deserialize)]
pub struct SessionScopedRequest {
    pub room: String,
    #[serde(alias = "sessionId")]
    pub session_id: String,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<String>,
}

#[derive(Serialize)]
pub struct SentimentResponse {
    pub session_id: String,
    pub sentiment: Option<Sentiment>,
    pub message_count: usize,
    pub duration_secs: i64,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn map_room_error(error: RoomError) -> ApiError {
    match &error {
        RoomError::InvalidRoom(_) => error_body(StatusCode::BAD_REQUEST, error.to_string()),
        _ => {
            warn!(error = %error, "room operation failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// POST /rate — attach a 1..=5 rating to a message.
pub async fn rate(
    State(state): State<AppState>,
    Json(request): Json<RateRequest>,
) -> Result<Json<RateResponse>, ApiError> {
    let room_id = RoomId::from_raw(&request.room);
    let db = state.rooms.database(&room_id).map_err(map_room_error)?;

    let repo = RatingRepo::new(db);
    let message_id = MessageId::from_raw(&request.message_id);
    match repo.add(&request.user_id, &message_id, request.rating) {
        Ok(id) => Ok(Json(RateResponse {
            id: id.as_str().to_string(),
        })),
        Err(StoreError::RangeViolation(detail)) => {
            Err(error_body(StatusCode::UNPROCESSABLE_ENTITY, detail))
        }
        Err(error) => {
            warn!(error = %error, "rating write failed");
            Err(error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

/// POST /context-aware-summary — summarize a session's conversation.
pub async fn summary(
    State(state): State<AppState>,
    Json(request): Json<SessionScopedRequest>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let context = session_context(&state, &request, SUMMARY_INSTRUCTION).await?;
    let summary = state.provider.complete(&context).await.map_err(|error| {
        warn!(kind = error.error_kind(), error = %error, "summary generation failed");
        error_body(StatusCode::BAD_GATEWAY, "generation failed")
    })?;
    Ok(Json(SummaryResponse { summary }))
}

/// POST /context-aware-suggestions — propose next messages for a session.
pub async fn suggestions(
    State(state): State<AppState>,
    Json(request): Json<SessionScopedRequest>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let context = session_context(&state, &request, SUGGESTIONS_INSTRUCTION).await?;
    let text = state.provider.complete(&context).await.map_err(|error| {
        warn!(kind = error.error_kind(), error = %error, "suggestion generation failed");
        error_body(StatusCode::BAD_GATEWAY, "generation failed")
    })?;

    let suggestions = text
        .lines()
        .map(|line| line.trim_start_matches(['-', '*', ' ']).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Json(SuggestionsResponse { suggestions }))
}

/// POST /context-aware-sentiment — the session's aggregate label, no
/// provider involved.
pub async fn session_sentiment(
    State(state): State<AppState>,
    Json(request): Json<SessionScopedRequest>,
) -> Result<Json<SentimentResponse>, ApiError> {
    let room_id = RoomId::from_raw(&request.room);
    let handle = state.rooms.room(&room_id).map_err(map_room_error)?;

    let session_id = SessionId::from_raw(&request.session_id);
    let session = handle
        .session(session_id.clone())
        .await
        .map_err(map_room_error)?
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "unknown session"))?;

    Ok(Json(SentimentResponse {
        session_id: session_id.as_str().to_string(),
        sentiment: session.sentiment,
        message_count: session.messages.len(),
        duration_secs: session.duration_secs,
    }))
}

/// Room window plus the session's own messages, with the task instruction
/// as the final turn.
async fn session_context(
    state: &AppState,
    request: &SessionScopedRequest,
    instruction: &str,
) -> Result<PromptContext, ApiError> {
    let room_id = RoomId::from_raw(&request.room);
    let handle = state.rooms.room(&room_id).map_err(map_room_error)?;

    let session_id = SessionId::from_raw(&request.session_id);
    if handle
        .session(session_id.clone())
        .await
        .map_err(map_room_error)?
        .is_none()
    {
        return Err(error_body(StatusCode::NOT_FOUND, "unknown session"));
    }

    let window = handle.snapshot().await.map_err(map_room_error)?;
    let session_subset: Vec<&ChatMessage> = window
        .iter()
        .filter(|m| m.session_id.as_ref() == Some(&session_id))
        .collect();

    let mut context = PromptContext::from_history(window.iter(), session_subset);
    context.turns.push(PromptTurn {
        role: Role::User,
        content: instruction.to_string(),
    });
    Ok(context)
}
