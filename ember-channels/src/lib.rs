//! Ember Channels - the Telegram front end of the Ember chat assistant.
//!
//! ```text
//! Telegram ─ getUpdates ─► TelegramChannel ─► Router ─┬─► command handlers
//!     ▲                                               └─► SessionManager (round)
//!     └──────────── sendMessage / sendChatAction ◄────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod command;
pub mod router;
pub mod telegram;

pub use command::{split_command_line, CommandError, CommandLine};
pub use router::Router;
pub use telegram::{parse_update, InboundMessage, TelegramChannel};

use anyhow::Context;
use ember_agent::{OpenAiClient, SessionManager, SessionSettings};
use ember_common::Config;
use ember_memory::SqliteStore;
use ember_tools::ToolDispatcher;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound messages buffered between the poller and the router.
const INBOX_CAPACITY: usize = 100;

/// Wire every component together from `config`.
pub fn build(config: &Config) -> anyhow::Result<(Arc<TelegramChannel>, Arc<Router>)> {
    let db_path = config.storage.resolved_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let store = Arc::new(store);
    let model = Arc::new(OpenAiClient::from_config(&config.llm));
    let tools = ToolDispatcher::new(store.clone());
    let manager = Arc::new(SessionManager::new(
        store.clone(),
        model,
        tools,
        SessionSettings::from_config(config),
    ));

    let channel = Arc::new(TelegramChannel::from_config(&config.telegram));
    let router = Arc::new(Router::new(manager, store, channel.clone()));
    Ok((channel, router))
}

/// Poll Telegram and handle every message on its own task.
///
/// Runs until the poller stops.
pub async fn serve(channel: Arc<TelegramChannel>, router: Arc<Router>) -> anyhow::Result<()> {
    if !channel.health_check().await {
        tracing::warn!("Telegram getMe failed, polling anyway");
    }

    let (tx, mut rx) = mpsc::channel(INBOX_CAPACITY);
    let listener = tokio::spawn(async move { channel.listen(tx).await });

    while let Some(msg) = rx.recv().await {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.handle_message(msg).await });
    }

    listener.await.context("Telegram listener panicked")?
}
