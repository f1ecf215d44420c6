//! Ember Memory - durable storage for the Ember bot.
//!
//! Three record kinds live side by side in one SQLite database:
//! - Conversation history: an append-only log of serialised turns per user
//! - Memory records: user-scoped facts created through the `create_memory` tool
//! - The allow-list: which Telegram users may talk to the bot, and who is admin
//!
//! Consumers program against the [`Store`] traits; [`SqliteStore`] is the
//! production backend.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    AllowedUser, HistoryRecord, HistoryStore, MemoryRecord, MemoryStore, Store, UserStore,
};
