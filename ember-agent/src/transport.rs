//! Outbound chat transport boundary.

use async_trait::async_trait;
use ember_common::ChatId;

/// Delivers text and activity indicators to a conversation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, chat_id: ChatId, text: &str) -> anyhow::Result<()>;

    /// Show the "typing..." indicator.
    async fn send_typing(&self, chat_id: ChatId) -> anyhow::Result<()>;
}
