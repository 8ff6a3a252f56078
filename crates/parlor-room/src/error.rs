use parlor_core::errors::ProviderError;
use parlor_core::frames::FrameError;
use parlor_core::ids::SessionId;
use parlor_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("session fingerprint mismatch for {0}")]
    FingerprintMismatch(SessionId),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid room id: {0}")]
    InvalidRoom(String),

    #[error("room actor unavailable")]
    ActorUnavailable,
}
