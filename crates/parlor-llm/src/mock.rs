use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::Stream;

use parlor_core::errors::ProviderError;
use parlor_core::provider::{ChatProvider, PromptContext};
use parlor_core::stream::ChunkEvent;

/// Pre-programmed responses for deterministic testing without network calls.
pub enum MockResponse {
    /// Yield a sequence of chunk events.
    Stream(Vec<ChunkEvent>),
    /// Return an error from the stream() call itself.
    Error(ProviderError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A complete text reply delivered in word-sized deltas.
    pub fn stream_text(text: &str) -> Self {
        let mut events = vec![ChunkEvent::Start];
        let mut rebuilt = String::new();
        for (i, word) in text.split(' ').enumerate() {
            let delta = if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            };
            rebuilt.push_str(&delta);
            events.push(ChunkEvent::Delta { delta });
        }
        events.push(ChunkEvent::Done { text: rebuilt });
        Self::Stream(events)
    }

    /// A stream that starts and then fails mid-flight.
    pub fn stream_error(error: ProviderError) -> Self {
        Self::Stream(vec![ChunkEvent::Start, ChunkEvent::Error { error }])
    }

    /// A stream that yields some deltas and then fails, never reaching Done.
    pub fn stream_text_then_error(partial: &str, error: ProviderError) -> Self {
        Self::Stream(vec![
            ChunkEvent::Start,
            ChunkEvent::Delta {
                delta: partial.to_string(),
            },
            ChunkEvent::Error { error },
        ])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _context: &PromptContext,
    ) -> Result<Pin<Box<dyn Stream<Item = ChunkEvent> + Send>>, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let response = match self.responses.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(_) => None,
        };

        let Some(response) = response else {
            return Err(ProviderError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(
    response: MockResponse,
) -> Result<Pin<Box<dyn Stream<Item = ChunkEvent> + Send>>, ProviderError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                return Ok(Box::pin(stream::iter(events)));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn text_response_chunks_and_completes() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("hello streaming world")]);
        let mut stream = mock.stream(&PromptContext::empty()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert!(matches!(events[0], ChunkEvent::Start));
        let deltas: String = events
            .iter()
            .filter_map(|e| match e {
                ChunkEvent::Delta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, "hello streaming world");
        assert!(
            matches!(events.last(), Some(ChunkEvent::Done { text }) if text == "hello streaming world")
        );
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(
            ProviderError::AuthenticationFailed("bad".into()),
        )]);
        let result = mock.stream(&PromptContext::empty()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockProvider::new(vec![
            MockResponse::stream_text("first"),
            MockResponse::stream_text("second"),
        ]);

        assert!(mock.stream(&PromptContext::empty()).await.is_ok());
        assert_eq!(mock.call_count(), 1);
        assert!(mock.stream(&PromptContext::empty()).await.is_ok());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("only one")]);
        let _ = mock.stream(&PromptContext::empty()).await;
        assert!(mock.stream(&PromptContext::empty()).await.is_err());
    }

    #[tokio::test]
    async fn complete_drains_stream() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("a full reply")]);
        let text = mock.complete(&PromptContext::empty()).await.unwrap();
        assert_eq!(text, "a full reply");
    }

    #[tokio::test]
    async fn complete_surfaces_mid_stream_error() {
        let mock = MockProvider::new(vec![MockResponse::stream_text_then_error(
            "partial",
            ProviderError::StreamInterrupted("connection reset".into()),
        )]);
        let result = mock.complete(&PromptContext::empty()).await;
        assert!(matches!(result, Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn delayed_response() {
        tokio::time::pause();
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::stream_text("after delay"),
        )]);

        let start = tokio::time::Instant::now();
        let mut stream = mock.stream(&PromptContext::empty()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        assert!(matches!(events.last(), Some(ChunkEvent::Done { .. })));
    }
}
