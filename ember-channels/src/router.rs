//! Inbound message routing: allow-list gate, slash commands and chat rounds.

use crate::command::CommandLine;
use crate::telegram::InboundMessage;
use ember_agent::{SessionManager, Transport};
use ember_common::{ChatId, UserId};
use ember_memory::Store;
use std::sync::Arc;

const HELP: &str = "Available commands:
/help show this message
/info show conversation info
/memory ls list stored memories
/memory rm <ID> delete a memory
/user ls list users
/user add <ID> [admin] add a user
/user rm <ID> remove a user
/user setadmin <ID> <true|false> grant or revoke admin";

/// Routes each inbound message to a command handler or a conversation round.
pub struct Router {
    manager: Arc<SessionManager>,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
}

impl Router {
    pub fn new(
        manager: Arc<SessionManager>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            manager,
            store,
            transport,
        }
    }

    /// Handle one inbound message. Failures are reported to the chat.
    pub async fn handle_message(&self, msg: InboundMessage) {
        let text = msg.text.trim();

        if text.eq_ignore_ascii_case("/start") {
            if let Err(e) = self.handle_start(&msg).await {
                tracing::error!(chat_id = msg.chat_id, error = %e, "Failed to answer /start");
            }
            return;
        }

        if !self.is_allowed(msg.user_id).await {
            return;
        }

        tracing::info!(
            chat_id = msg.chat_id,
            user_id = msg.user_id,
            username = %msg.username,
            "Received message"
        );

        let result = if text.starts_with('/') {
            self.handle_command(msg.chat_id, msg.user_id, text).await
        } else {
            self.manager
                .run_round(
                    msg.user_id,
                    &msg.username,
                    msg.chat_id,
                    text,
                    Arc::clone(&self.transport),
                )
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        };

        if let Err(e) = result {
            self.send_error(msg.chat_id, &e).await;
        }
    }

    async fn handle_start(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        if !self.is_allowed(msg.user_id).await {
            tracing::info!(
                chat_id = msg.chat_id,
                user_id = msg.user_id,
                username = %msg.username,
                "New user not on the allow-list"
            );
            let text = format!(
                "You are not on the allow-list, please contact an administrator. UserID={}.",
                msg.user_id
            );
            return self.reply(msg.chat_id, &text).await;
        }

        self.reply(msg.chat_id, &format!("{}, welcome back!", msg.username))
            .await
    }

    /// Whether `user_id` may talk to the bot.
    ///
    /// The first sender ever becomes the admin. Store failures deny access.
    async fn is_allowed(&self, user_id: UserId) -> bool {
        let check = async {
            if self.store.claim_first_admin(user_id).await? {
                tracing::info!(user_id, "First admin registered");
                return Ok(true);
            }
            Ok::<_, anyhow::Error>(self.store.get_user(user_id).await?.is_some())
        };

        match check.await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to check allow-list");
                false
            }
        }
    }

    async fn handle_command(&self, chat_id: ChatId, user_id: UserId, text: &str) -> anyhow::Result<()> {
        let Some(cmd) = CommandLine::parse(text)? else {
            return Ok(());
        };
        self.execute_command(&cmd.name, chat_id, user_id, &cmd.args)
            .await
    }

    /// Run a parsed slash command.
    pub async fn execute_command(
        &self,
        command: &str,
        chat_id: ChatId,
        user_id: UserId,
        args: &[String],
    ) -> anyhow::Result<()> {
        match command {
            "help" => self.reply(chat_id, HELP).await,
            "info" => self.handle_info(chat_id, user_id).await,
            "memory" => self.handle_memory(chat_id, user_id, args).await,
            "user" => self.handle_user(chat_id, user_id, args).await,
            _ => {
                self.reply(chat_id, "Unknown command, try /help.")
                    .await
            }
        }
    }

    async fn handle_info(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<()> {
        drop(self.manager.get_or_init_session(user_id).await?);
        let stats = self.manager.session_stats(user_id).await.unwrap_or_default();
        let persisted = self.store.count_history(user_id).await?;
        let memories = self.store.list_memories(user_id).await?.len();

        let settings = self.manager.settings();
        let max_rounds = if settings.max_rounds > 0 {
            settings.max_rounds.to_string()
        } else {
            "unlimited".to_string()
        };

        let mut text = format!(
            "Info\n\n\
             Rounds in memory: {}\n\
             Max rounds: {max_rounds}\n\
             Messages in memory: {}\n\
             Messages in database: {persisted}\n\
             Stored memories: {memories}\n\
             Model: {}",
            stats.rounds_in_memory, stats.messages_in_memory, settings.model
        );
        if stats.unsaved_messages > 0 {
            text.push_str(&format!("\nUnsaved messages: {}", stats.unsaved_messages));
        }
        self.reply(chat_id, &text).await
    }

    async fn handle_memory(&self, chat_id: ChatId, user_id: UserId, args: &[String]) -> anyhow::Result<()> {
        let sub = args.first().map(|s| s.to_lowercase());
        match sub.as_deref() {
            None | Some("ls" | "list") => self.list_memories(chat_id, user_id).await,
            Some("rm" | "remove") => self.remove_memory(chat_id, user_id, &args[1..]).await,
            Some(_) => {
                self.reply(chat_id, "Unknown subcommand, use ls (list) or rm (remove).")
                    .await
            }
        }
    }

    async fn list_memories(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<()> {
        let memories = self.store.list_memories(user_id).await?;

        let listing = if memories.is_empty() {
            "No memories yet.".to_string()
        } else {
            memories
                .iter()
                .map(|m| format!("ID: {} - {}", m.id, m.content))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let text = format!(
            "All memories\n\n{listing}\n\nTo delete a memory, send /memory rm <ID>"
        );
        self.reply(chat_id, &text).await
    }

    async fn remove_memory(&self, chat_id: ChatId, user_id: UserId, args: &[String]) -> anyhow::Result<()> {
        let Some(raw) = args.first() else {
            return self.reply(chat_id, "Please give the ID of the memory to delete.").await;
        };
        let Ok(id) = raw.parse::<i64>() else {
            return self.reply(chat_id, "The memory ID must be a number.").await;
        };

        if self.store.delete_memory(user_id, id).await? {
            tracing::info!(user_id, memory_id = id, "Memory deleted");
            self.reply(chat_id, "Memory deleted.").await
        } else {
            self.reply(
                chat_id,
                "Could not delete that memory, check the ID belongs to you.",
            )
            .await
        }
    }

    async fn handle_user(&self, chat_id: ChatId, user_id: UserId, args: &[String]) -> anyhow::Result<()> {
        let is_admin = self
            .store
            .get_user(user_id)
            .await?
            .is_some_and(|u| u.is_admin);
        if !is_admin {
            return self.reply(chat_id, "Only admins can use this command.").await;
        }

        let sub = args.first().map(|s| s.to_lowercase());
        let rest = args.get(1..).unwrap_or_default();
        match sub.as_deref() {
            None | Some("ls" | "list") => self.list_users(chat_id).await,
            Some("add") => self.add_user(chat_id, rest).await,
            Some("rm" | "remove") => self.remove_user(chat_id, rest).await,
            Some("setadmin") => self.set_admin(chat_id, user_id, rest).await,
            Some(_) => {
                self.reply(chat_id, "Unknown subcommand, use ls/add/rm/setadmin.")
                    .await
            }
        }
    }

    async fn list_users(&self, chat_id: ChatId) -> anyhow::Result<()> {
        let users = self.store.list_users().await?;

        let listing = if users.is_empty() {
            "No users.".to_string()
        } else {
            users
                .iter()
                .map(|u| {
                    let role = if u.is_admin { "Admin" } else { "User" };
                    format!("ID: {} - {role}", u.user_id)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        self.reply(chat_id, &format!("All users\n\n{listing}")).await
    }

    async fn add_user(&self, chat_id: ChatId, args: &[String]) -> anyhow::Result<()> {
        let Some(raw) = args.first() else {
            return self.reply(chat_id, "Please give the ID of the user to add.").await;
        };
        let Ok(target) = raw.parse::<UserId>() else {
            return self.reply(chat_id, "The user ID must be a number.").await;
        };
        let as_admin = args.get(1).is_some_and(|a| a.eq_ignore_ascii_case("admin"));

        self.store.upsert_user(target, as_admin).await?;
        tracing::info!(user_id = target, is_admin = as_admin, "User added to allow-list");
        self.reply(chat_id, "User added.").await
    }

    async fn remove_user(&self, chat_id: ChatId, args: &[String]) -> anyhow::Result<()> {
        let Some(raw) = args.first() else {
            return self.reply(chat_id, "Please give the ID of the user to remove.").await;
        };
        let Ok(target) = raw.parse::<UserId>() else {
            return self.reply(chat_id, "The user ID must be a number.").await;
        };

        if self.store.delete_user(target).await? {
            tracing::info!(user_id = target, "User removed from allow-list");
            self.reply(chat_id, "User removed.").await
        } else {
            self.reply(chat_id, &format!("User {target} is not on the allow-list."))
                .await
        }
    }

    async fn set_admin(&self, chat_id: ChatId, caller: UserId, args: &[String]) -> anyhow::Result<()> {
        let [raw, flag, ..] = args else {
            return self.reply(chat_id, "Usage: /user setadmin <ID> <true|false>").await;
        };
        let Ok(target) = raw.parse::<UserId>() else {
            return self.reply(chat_id, "The user ID must be a number.").await;
        };
        let grant = matches!(flag.to_lowercase().as_str(), "true" | "1" | "yes");

        if target == caller && !grant {
            return self
                .reply(chat_id, "You cannot demote yourself from admin.")
                .await;
        }

        if self.store.set_admin(target, grant).await? {
            tracing::info!(user_id = target, is_admin = grant, "Admin flag updated");
            self.reply(chat_id, "Admin status updated.").await
        } else {
            self.reply(chat_id, &format!("User {target} is not on the allow-list."))
                .await
        }
    }

    async fn reply(&self, chat_id: ChatId, text: &str) -> anyhow::Result<()> {
        self.transport.send_text(chat_id, text).await
    }

    async fn send_error(&self, chat_id: ChatId, err: &anyhow::Error) {
        tracing::info!(chat_id, error = %err, "Reporting error to chat");

        let text = format!(">_< Fatal Error !\n{err}");
        if let Err(e) = self.transport.send_text(chat_id, &text).await {
            tracing::error!(chat_id, error = %e, "Failed to report error to chat");
        }
    }
}
