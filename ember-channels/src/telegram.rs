//! Telegram Bot API channel: long-polls `getUpdates` and implements the
//! outbound [`Transport`].

use async_trait::async_trait;
use ember_agent::Transport;
use ember_common::{ChatId, TelegramConfig, UserId};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Pause after a failed poll before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A text message received from Telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: String,
    pub text: String,
}

/// Telegram channel, long-polling the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    poll_timeout: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: impl Into<String>, api_base: impl Into<String>, poll_timeout: u64) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            poll_timeout,
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(&config.bot_token, &config.api_base, config.poll_timeout_secs)
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Call a Bot API method and return its `result` field.
    ///
    /// Non-2xx statuses and `"ok": false` envelopes are errors.
    async fn call(&self, method: &str, body: &Value, timeout: Duration) -> anyhow::Result<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram {method} failed ({status}): {err}");
        }

        let mut data: Value = resp.json().await?;
        if !data.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            anyhow::bail!("Telegram {method} rejected: {description}");
        }

        Ok(data.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }

    /// Fetch the next batch of updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64) -> anyhow::Result<Vec<Value>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": self.poll_timeout,
            "allowed_updates": ["message"]
        });
        let timeout = Duration::from_secs(self.poll_timeout + 10);

        match self.call("getUpdates", &body, timeout).await? {
            Value::Array(updates) => Ok(updates),
            other => anyhow::bail!("Telegram getUpdates returned {other}, expected an array"),
        }
    }

    /// Poll forever, forwarding text messages to `tx`.
    ///
    /// Returns once the receiving side has gone away.
    pub async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e:#}");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in &updates {
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = offset.max(uid + 1);
                }

                let Some(msg) = parse_update(update) else {
                    continue;
                };

                if tx.send(msg).await.is_err() {
                    tracing::info!("Message receiver closed, Telegram listener stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Whether the token is accepted by `getMe`.
    pub async fn health_check(&self) -> bool {
        self.call("getMe", &serde_json::json!({}), Duration::from_secs(10))
            .await
            .is_ok()
    }
}

/// Extract a text message from an update; anything else yields `None`.
pub fn parse_update(update: &Value) -> Option<InboundMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?;
    let from = message.get("from")?;
    let user_id = from.get("id").and_then(Value::as_i64)?;

    let username = from
        .get("username")
        .and_then(Value::as_str)
        .or_else(|| from.get("first_name").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();

    Some(InboundMessage {
        chat_id,
        user_id,
        username,
        text: text.to_string(),
    })
}

#[async_trait]
impl Transport for TelegramChannel {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        self.call("sendMessage", &body, Duration::from_secs(30))
            .await
            .map(|_| ())
    }

    async fn send_typing(&self, chat_id: ChatId) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": "typing",
        });
        self.call("sendChatAction", &body, Duration::from_secs(10))
            .await
            .map(|_| ())
    }
}
