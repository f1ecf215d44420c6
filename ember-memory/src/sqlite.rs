//! SQLite storage backend.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

use crate::traits::{
    AllowedUser, HistoryRecord, HistoryStore, MemoryRecord, MemoryStore, UserStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ember_common::{Turn, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite store for history, memories and the allow-list.
///
/// All queries run on the blocking thread pool against one shared connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        Self::init_schema(&conn)?;

        tracing::info!(path = %db_path.display(), "SQLite store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL,
                payload     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id, id);

            CREATE TABLE IF NOT EXISTS memories (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL,
                content     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);

            CREATE TABLE IF NOT EXISTS allowed_users (
                user_id     INTEGER PRIMARY KEY,
                is_admin    INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;
            f(&mut conn)
        })
        .await?
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn history_page(
        &self,
        user_id: UserId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, payload, created_at
                 FROM history
                 WHERE user_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64, offset as i64], |row| {
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    payload: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .context("Failed to read history page")
    }

    async fn append_history(&self, user_id: UserId, turns: &[Turn]) -> Result<()> {
        if turns.is_empty() {
            return Ok(());
        }

        let payloads = turns
            .iter()
            .map(Turn::to_json)
            .collect::<serde_json::Result<Vec<_>>>()
            .context("Failed to serialise turns")?;

        let written = payloads.len();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO history (user_id, payload, created_at) VALUES (?1, ?2, ?3)",
                )?;
                let ts = now();
                for payload in &payloads {
                    stmt.execute(params![user_id, payload, ts])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .context("Failed to write history")?;

        tracing::debug!(user_id, messages = written, "History written");
        Ok(())
    }

    async fn count_history(&self, user_id: UserId) -> Result<usize> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM history WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn create_memory(&self, user_id: UserId, content: &str) -> Result<MemoryRecord> {
        let content = content.to_string();
        self.with_conn(move |conn| {
            let created_at = now();
            conn.execute(
                "INSERT INTO memories (user_id, content, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, content, created_at],
            )?;
            Ok(MemoryRecord {
                id: conn.last_insert_rowid(),
                user_id,
                content,
                created_at,
            })
        })
        .await
        .context("Failed to create memory")
    }

    async fn list_memories(&self, user_id: UserId) -> Result<Vec<MemoryRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, created_at
                 FROM memories
                 WHERE user_id = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(MemoryRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
    }

    async fn delete_memory(&self, user_id: UserId, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let affected = conn.execute(
                "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(affected > 0)
        })
        .await
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AllowedUser> {
    Ok(AllowedUser {
        user_id: row.get(0)?,
        is_admin: row.get::<_, i64>(1)? != 0,
        created_at: row.get(2)?,
    })
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn has_any_user(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM allowed_users)",
                [],
                |row| row.get(0),
            )?;
            Ok(exists != 0)
        })
        .await
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<AllowedUser>> {
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT user_id, is_admin, created_at FROM allowed_users WHERE user_id = ?1",
                    params![user_id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn list_users(&self) -> Result<Vec<AllowedUser>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, is_admin, created_at
                 FROM allowed_users
                 ORDER BY created_at ASC, user_id ASC",
            )?;
            let rows = stmt.query_map([], user_from_row)?;

            let mut users = Vec::new();
            for row in rows {
                users.push(row?);
            }
            Ok(users)
        })
        .await
    }

    async fn upsert_user(&self, user_id: UserId, is_admin: bool) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO allowed_users (user_id, is_admin, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET is_admin = excluded.is_admin",
                params![user_id, is_admin as i64, now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_user(&self, user_id: UserId) -> Result<bool> {
        self.with_conn(move |conn| {
            let affected =
                conn.execute("DELETE FROM allowed_users WHERE user_id = ?1", params![user_id])?;
            Ok(affected > 0)
        })
        .await
    }

    async fn set_admin(&self, user_id: UserId, is_admin: bool) -> Result<bool> {
        self.with_conn(move |conn| {
            let affected = conn.execute(
                "UPDATE allowed_users SET is_admin = ?1 WHERE user_id = ?2",
                params![is_admin as i64, user_id],
            )?;
            Ok(affected > 0)
        })
        .await
    }

    async fn claim_first_admin(&self, user_id: UserId) -> Result<bool> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count: i64 =
                tx.query_row("SELECT COUNT(*) FROM allowed_users", [], |row| row.get(0))?;
            if count > 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO allowed_users (user_id, is_admin, created_at) VALUES (?1, 1, ?2)",
                params![user_id, now()],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }
}
