//! Model client boundary.
//!
//! A [`ModelClient`] takes the full message list plus tool schemas and returns
//! an incremental stream of content deltas and completed tool calls.

use async_trait::async_trait;
use ember_common::{ToolCall, Turn};
use ember_tools::ToolSpec;
use futures_util::Stream;
use std::pin::Pin;

/// One streaming completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// System prompt first, then history in conversation order.
    pub messages: Vec<Turn>,
    pub tools: Vec<ToolSpec>,
}

/// An event decoded from the model's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of assistant text.
    ContentDelta(String),
    /// A tool call whose id, name and arguments are fully received.
    ToolCallFinished(ToolCall),
}

/// Stream of model events. An `Err` item is terminal.
pub type ChatStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// LLM completion backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Backend name (e.g. "openai").
    fn name(&self) -> &str;

    /// Open a streaming completion.
    async fn stream_chat(&self, request: ChatRequest) -> anyhow::Result<ChatStream>;
}
