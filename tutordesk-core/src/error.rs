use api::ConversationId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or backend failure; transient from the engine's point of view.
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// A response arrived for a store generation or conversation that is no longer current.
    #[error("stale response for conversation {conversation} (generation {generation})")]
    Stale {
        conversation: ConversationId,
        generation: u64,
    },

    /// The same kind of request is already outstanding.
    #[error("{0} already in flight")]
    InFlight(&'static str),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("engine is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
