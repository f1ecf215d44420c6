//! Resolve, validate and execute model tool calls.

use crate::tool::Tool;
use crate::traits::{ToolResult, ToolSpec};
use ember_common::{ToolCall, Turn, UserId};
use ember_memory::MemoryStore;
use std::sync::Arc;

/// Executes tool calls on behalf of a user.
#[derive(Clone)]
pub struct ToolDispatcher {
    memory: Arc<dyn MemoryStore>,
}

impl ToolDispatcher {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }

    /// Schemas for every tool, in a stable order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        Tool::ALL.iter().map(Tool::spec).collect()
    }

    /// Run one tool call and produce the matching tool-result turn.
    ///
    /// Never fails: unknown tools and bad arguments yield error results so the
    /// model can correct itself on the next pass.
    pub async fn dispatch(&self, call: &ToolCall, user_id: UserId) -> Turn {
        let result = self.run(call, user_id).await;
        if !result.success {
            tracing::debug!(
                user_id,
                tool = %call.name(),
                call_id = %call.id,
                error = result.error.as_deref().unwrap_or_default(),
                "Tool call returned an error result"
            );
        }
        Turn::tool(call.id.clone(), result.to_content())
    }

    async fn run(&self, call: &ToolCall, user_id: UserId) -> ToolResult {
        let Some(tool) = Tool::from_name(call.name()) else {
            tracing::warn!(user_id, tool = %call.name(), "Model called a tool that does not exist");
            return ToolResult::failure(format!("tool \"{}\" does not exist.", call.name()));
        };

        let invocation = match tool.validate(&call.function.arguments) {
            Ok(invocation) => invocation,
            Err(e) => return ToolResult::failure(e.to_string()),
        };

        tracing::info!(user_id, tool = tool.name(), call_id = %call.id, "Executing tool");
        invocation.execute(user_id, self.memory.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ember_memory::{MemoryRecord, SqliteStore};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<SqliteStore>, ToolDispatcher) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&tmp.path().join("ember.db")).unwrap());
        let dispatcher = ToolDispatcher::new(store.clone());
        (tmp, store, dispatcher)
    }

    struct BrokenMemory;

    #[async_trait]
    impl MemoryStore for BrokenMemory {
        async fn create_memory(&self, _: UserId, _: &str) -> anyhow::Result<MemoryRecord> {
            anyhow::bail!("disk full")
        }

        async fn list_memories(&self, _: UserId) -> anyhow::Result<Vec<MemoryRecord>> {
            Ok(vec![])
        }

        async fn delete_memory(&self, _: UserId, _: i64) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn create_memory_persists_and_reports_success() {
        let (_tmp, store, dispatcher) = setup();
        let call = ToolCall::new("call_1", "create_memory", r#"{"what":"likes tea"}"#);

        let turn = dispatcher.dispatch(&call, 42).await;

        let Turn::Tool { tool_call_id, content } = turn else {
            panic!("expected tool turn");
        };
        assert_eq!(tool_call_id, "call_1");
        assert!(content.starts_with("Success:"));
        assert!(content.contains("likes tea"));

        let memories = store.list_memories(42).await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "likes tea");
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_and_touches_nothing() {
        let (_tmp, store, dispatcher) = setup();
        let call = ToolCall::new("call_9", "launch_rockets", r#"{"what":"x"}"#);

        for _ in 0..2 {
            let turn = dispatcher.dispatch(&call, 1).await;
            assert_eq!(
                turn,
                Turn::tool("call_9", "Error: tool \"launch_rockets\" does not exist.")
            );
        }
        assert!(store.list_memories(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_argument_is_reported_to_model() {
        let (_tmp, store, dispatcher) = setup();
        let call = ToolCall::new("c", "create_memory", r#"{"memory":"likes tea"}"#);

        let turn = dispatcher.dispatch(&call, 1).await;
        assert!(turn.content().starts_with("Error:"));
        assert!(turn.content().contains("\"what\""));
        assert!(store.list_memories(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_type_names_expected_and_actual() {
        let (_tmp, _store, dispatcher) = setup();
        let call = ToolCall::new("c", "create_memory", r#"{"what":true}"#);

        let turn = dispatcher.dispatch(&call, 1).await;
        assert_eq!(
            turn.content(),
            "Error: argument \"what\" must be of type string, but got boolean"
        );
    }

    #[tokio::test]
    async fn storage_failure_becomes_error_result() {
        let dispatcher = ToolDispatcher::new(Arc::new(BrokenMemory));
        let call = ToolCall::new("c", "create_memory", r#"{"what":"likes tea"}"#);

        let turn = dispatcher.dispatch(&call, 1).await;
        assert!(turn.content().starts_with("Error: memory \"likes tea\""));
        assert!(turn.content().contains("disk full"));
    }

    #[test]
    fn specs_cover_every_tool() {
        let dispatcher = ToolDispatcher::new(Arc::new(BrokenMemory));
        let names: Vec<_> = dispatcher.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["create_memory"]);
    }
}
