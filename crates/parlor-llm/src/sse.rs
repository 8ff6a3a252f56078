use serde::Deserialize;

use parlor_core::errors::ProviderError;
use parlor_core::stream::ChunkEvent;

/// State machine for turning the provider's SSE events into chunk events.
/// Accumulates delta text so a `done` event without a full-text payload can
/// still carry the complete response.
pub struct SseParser {
    accumulated: String,
    started: bool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            accumulated: String::new(),
            started: false,
        }
    }

    /// Parse a single SSE event and return zero or more chunk events.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<ChunkEvent> {
        let mut events = Vec::new();

        match event_type {
            "start" => {
                self.started = true;
                events.push(ChunkEvent::Start);
            }

            "delta" => {
                if !self.started {
                    self.started = true;
                    events.push(ChunkEvent::Start);
                }
                if let Ok(payload) = serde_json::from_str::<DeltaPayload>(data) {
                    if !payload.text.is_empty() {
                        self.accumulated.push_str(&payload.text);
                        events.push(ChunkEvent::Delta {
                            delta: payload.text,
                        });
                    }
                }
            }

            "done" => {
                let text = match serde_json::from_str::<DonePayload>(data) {
                    Ok(DonePayload { text: Some(text) }) => text,
                    _ => std::mem::take(&mut self.accumulated),
                };
                events.push(ChunkEvent::Done { text });
            }

            "error" => {
                let error = match serde_json::from_str::<ErrorPayload>(data) {
                    Ok(payload) => classify_error(&payload),
                    Err(_) => ProviderError::StreamInterrupted(format!(
                        "malformed error event: {data}"
                    )),
                };
                events.push(ChunkEvent::Error { error });
            }

            _ => {} // ping, comments
        }

        events
    }
}

fn classify_error(err: &ErrorPayload) -> ProviderError {
    match err.error_type.as_str() {
        "rate_limit_error" => ProviderError::RateLimited { retry_after: None },
        "authentication_error" => ProviderError::AuthenticationFailed(err.message.clone()),
        "invalid_request_error" => ProviderError::InvalidRequest(err.message.clone()),
        "overloaded_error" => ProviderError::ServerError {
            status: 529,
            body: err.message.clone(),
        },
        _ => ProviderError::ServerError {
            status: 500,
            body: err.message.clone(),
        },
    }
}

/// Parse raw SSE text into (event_type, data) pairs.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event: ") {
            current_event = event.to_string();
        } else if let Some(data) = line.strip_prefix("data: ") {
            current_data = data.to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((current_event.clone(), current_data.clone()));
            current_event.clear();
            current_data.clear();
        }
    }

    // Trailing event without a terminating blank line
    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

#[derive(Deserialize)]
struct DeltaPayload {
    text: String,
}

#[derive(Deserialize)]
struct DonePayload {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
