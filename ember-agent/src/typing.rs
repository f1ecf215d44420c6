//! Repeating "typing..." indicator for the duration of a round.

use crate::transport::Transport;
use ember_common::ChatId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background task sending the typing indicator immediately and then every
/// `interval`. The task stops when the guard is dropped, on every exit path.
pub struct TypingIndicator {
    handle: JoinHandle<()>,
}

impl TypingIndicator {
    pub fn start(transport: Arc<dyn Transport>, chat_id: ChatId, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = transport.send_typing(chat_id).await {
                    tracing::warn!(chat_id, error = %e, "Failed to send typing indicator");
                }
            }
        });
        Self { handle }
    }

    /// Stop the indicator now.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
