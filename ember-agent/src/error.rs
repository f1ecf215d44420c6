//! Round-level errors.

use thiserror::Error;

/// Why a conversation round did not complete.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("failed to load conversation history: {0:#}")]
    SessionLoad(anyhow::Error),

    /// Turns from an earlier round are still unsaved and the retry failed.
    #[error("previous conversation is not saved yet, try again later: {0:#}")]
    PendingPersistence(anyhow::Error),

    #[error("failed to build conversation context: {0:#}")]
    Context(anyhow::Error),

    #[error("model request failed: {0:#}")]
    Model(anyhow::Error),

    #[error("failed to deliver reply: {0:#}")]
    Flush(anyhow::Error),

    #[error("model kept requesting tools after {0} passes")]
    ToolLoopExceeded(usize),

    /// The round completed in memory but could not be written.
    #[error("failed to save conversation history: {0:#}")]
    Persistence(anyhow::Error),
}

impl RoundError {
    /// Whether the round's turns were kept in memory.
    pub fn keeps_turns(&self) -> bool {
        matches!(self, RoundError::Persistence(_))
    }
}
