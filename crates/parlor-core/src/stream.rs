use crate::errors::ProviderError;

/// Events emitted while streaming a generated reply. Ordering contract:
///
/// Start → Delta* → Done, with Error possible at any point (terminal).
#[derive(Clone, Debug)]
pub enum ChunkEvent {
    Start,
    Delta { delta: String },
    Done { text: String },
    Error { error: ProviderError },
}

impl ChunkEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
