//! Storage traits and record types.

use async_trait::async_trait;
use ember_common::{Turn, UserId};
use serde::{Deserialize, Serialize};

/// One persisted turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub user_id: UserId,
    /// Turn JSON in the OpenAI message format
    pub payload: String,
    /// Unix seconds
    pub created_at: i64,
}

impl HistoryRecord {
    /// Decode the stored turn.
    pub fn turn(&self) -> serde_json::Result<Turn> {
        Turn::from_json(&self.payload)
    }
}

/// A user-scoped fact the assistant was asked to remember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub user_id: UserId,
    pub content: String,
    pub created_at: i64,
}

/// An allow-listed Telegram user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedUser {
    pub user_id: UserId,
    pub is_admin: bool,
    pub created_at: i64,
}

/// Append-only conversation log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Fetch one page of a user's history, newest first.
    async fn history_page(
        &self,
        user_id: UserId,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoryRecord>>;

    /// Append turns in order. Either every turn is written or none is.
    async fn append_history(&self, user_id: UserId, turns: &[Turn]) -> anyhow::Result<()>;

    /// Total persisted turns for a user.
    async fn count_history(&self, user_id: UserId) -> anyhow::Result<usize>;
}

/// Long-term memory records.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn create_memory(&self, user_id: UserId, content: &str) -> anyhow::Result<MemoryRecord>;

    /// All of a user's memories, oldest first.
    async fn list_memories(&self, user_id: UserId) -> anyhow::Result<Vec<MemoryRecord>>;

    /// Delete a memory owned by `user_id`.
    ///
    /// Returns false when the id does not exist or belongs to someone else.
    async fn delete_memory(&self, user_id: UserId, id: i64) -> anyhow::Result<bool>;
}

/// Allow-list of users permitted to talk to the bot.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn has_any_user(&self) -> anyhow::Result<bool>;

    async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<AllowedUser>>;

    async fn list_users(&self) -> anyhow::Result<Vec<AllowedUser>>;

    /// Insert the user, or update the admin flag if already listed.
    async fn upsert_user(&self, user_id: UserId, is_admin: bool) -> anyhow::Result<()>;

    /// Returns false when the user was not listed.
    async fn delete_user(&self, user_id: UserId) -> anyhow::Result<bool>;

    /// Returns false when the user was not listed.
    async fn set_admin(&self, user_id: UserId, is_admin: bool) -> anyhow::Result<bool>;

    /// Register `user_id` as admin if and only if the allow-list is empty.
    ///
    /// The check and insert happen atomically, so two concurrent first
    /// contacts cannot both become the first admin.
    async fn claim_first_admin(&self, user_id: UserId) -> anyhow::Result<bool>;
}

/// Everything the bot needs from storage.
pub trait Store: HistoryStore + MemoryStore + UserStore {}

impl<T: HistoryStore + MemoryStore + UserStore + ?Sized> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_record_decodes_turn() {
        let record = HistoryRecord {
            id: 1,
            user_id: 42,
            payload: r#"{"role":"user","content":"hello"}"#.into(),
            created_at: 0,
        };
        assert_eq!(record.turn().unwrap(), Turn::user("hello"));
    }

    #[test]
    fn history_record_rejects_garbage() {
        let record = HistoryRecord {
            id: 1,
            user_id: 42,
            payload: "not json".into(),
            created_at: 0,
        };
        assert!(record.turn().is_err());
    }
}
