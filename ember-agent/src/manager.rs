//! Session manager: owns every user's session and runs conversation rounds.

use crate::accumulator::consume_stream;
use crate::error::RoundError;
use crate::provider::{ChatRequest, ModelClient};
use crate::round::RoundState;
use crate::session::{count_user_turns, load_history, trim_to_rounds, Session};
use crate::transport::Transport;
use crate::typing::TypingIndicator;
use dashmap::DashMap;
use ember_common::{ChatId, Config, Turn, UserId};
use ember_memory::Store;
use ember_tools::ToolDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Engine settings, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    pub system_prompt: String,
    /// Retention window in user rounds; `<= 0` keeps everything.
    pub max_rounds: i64,
    pub max_tool_iterations: usize,
    pub typing_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            system_prompt: config.session.system_prompt.clone(),
            max_rounds: config.session.max_rounds,
            max_tool_iterations: config.session.max_tool_iterations.max(1),
            typing_interval: Duration::from_secs(config.session.typing_interval_secs.max(1)),
        }
    }
}

/// Outcome of a completed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    /// Turns appended (and persisted) by this round.
    pub new_messages: usize,
    /// Turns in memory after trimming.
    pub total_messages: usize,
    pub rounds_in_memory: usize,
    pub tool_calls: usize,
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub rounds_in_memory: usize,
    pub messages_in_memory: usize,
    pub unsaved_messages: usize,
}

/// Owns the per-user session table.
///
/// Each session sits behind its own async mutex: one user's rounds are
/// serialised, while rounds of different users run concurrently.
pub struct SessionManager {
    sessions: DashMap<UserId, Arc<Mutex<Session>>>,
    store: Arc<dyn Store>,
    model: Arc<dyn ModelClient>,
    tools: ToolDispatcher,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn ModelClient>,
        tools: ToolDispatcher,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            model,
            tools,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn slot(&self, user_id: UserId) -> Arc<Mutex<Session>> {
        Arc::clone(&self.sessions.entry(user_id).or_default())
    }

    /// Lock the user's session, loading history on first contact.
    ///
    /// A failed load leaves the session unloaded so the next call retries.
    pub async fn get_or_init_session(
        &self,
        user_id: UserId,
    ) -> Result<OwnedMutexGuard<Session>, RoundError> {
        let mut session = self.slot(user_id).lock_owned().await;
        if !session.loaded {
            let turns = load_history(self.store.as_ref(), user_id, self.settings.max_rounds)
                .await
                .map_err(|e| {
                    tracing::error!(user_id, error = %e, "Failed to load session history");
                    RoundError::SessionLoad(e)
                })?;
            session.turns = turns;
            session.loaded = true;
        }
        Ok(session)
    }

    /// Current in-memory stats, or `None` if the user has no session yet.
    pub async fn session_stats(&self, user_id: UserId) -> Option<SessionStats> {
        let slot = self.sessions.get(&user_id).map(|s| Arc::clone(&s))?;
        let session = slot.lock().await;
        Some(SessionStats {
            rounds_in_memory: session.rounds(),
            messages_in_memory: session.turns.len(),
            unsaved_messages: session.pending.len(),
        })
    }

    /// Run one round: user input in, streamed reply out, history persisted.
    ///
    /// The round's turns are collected aside and merged into the session only
    /// after every streaming pass has succeeded and the durable write has
    /// committed, so a failed or cancelled round leaves the session as it was.
    /// A failed write keeps the turns in memory and marks them pending.
    pub async fn run_round(
        &self,
        user_id: UserId,
        username: &str,
        chat_id: ChatId,
        input: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<RoundSummary, RoundError> {
        let mut session = self.get_or_init_session(user_id).await?;

        if session.has_pending() {
            self.store
                .append_history(user_id, &session.pending)
                .await
                .map_err(RoundError::PendingPersistence)?;
            tracing::info!(
                user_id,
                messages = session.pending.len(),
                "Saved history left over from an earlier round"
            );
            session.pending.clear();
        }

        let system_prompt = self
            .build_system_prompt(user_id, username)
            .await
            .map_err(RoundError::Context)?;

        let mut round = vec![time_turn(), Turn::user(input.trim())];

        let typing = TypingIndicator::start(
            Arc::clone(&transport),
            chat_id,
            self.settings.typing_interval,
        );
        let mut state = RoundState::Idle;
        let outcome = self
            .drive(
                &system_prompt,
                &session.turns,
                &mut round,
                &mut state,
                user_id,
                chat_id,
                transport.as_ref(),
            )
            .await;
        typing.stop();

        let outcome = match outcome {
            Ok(tool_calls) => self
                .store
                .append_history(user_id, &round)
                .await
                .map(|()| tool_calls)
                .map_err(RoundError::Persistence),
            Err(e) => Err(e),
        };

        let tool_calls = match outcome {
            Ok(tool_calls) => tool_calls,
            Err(e) => {
                if e.keeps_turns() {
                    tracing::error!(user_id, messages = round.len(), error = %e, "Failed to save round");
                    session.turns.extend(round.iter().cloned());
                    session.pending = round;
                }
                return Err(e);
            }
        };

        session.turns.extend(round.iter().cloned());
        trim_to_rounds(&mut session.turns, self.settings.max_rounds);

        let summary = RoundSummary {
            new_messages: round.len(),
            total_messages: session.turns.len(),
            rounds_in_memory: count_user_turns(&session.turns),
            tool_calls,
        };
        tracing::info!(
            user_id,
            new_messages = summary.new_messages,
            total_messages = summary.total_messages,
            rounds_in_memory = summary.rounds_in_memory,
            tool_calls,
            state = state.label(),
            "Round completed"
        );
        Ok(summary)
    }

    /// Run streaming passes and tool calls until the model stops asking for
    /// tools. Returns the number of tool calls executed; `state` ends as
    /// `Done` or `Failed`.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        system_prompt: &str,
        history: &[Turn],
        round: &mut Vec<Turn>,
        state: &mut RoundState,
        user_id: UserId,
        chat_id: ChatId,
        transport: &dyn Transport,
    ) -> Result<usize, RoundError> {
        let mut tool_calls = 0;
        let mut failure = None;
        *state = std::mem::take(state).start();

        while !state.is_terminal() {
            let phase = state.label();
            let step = match std::mem::take(state) {
                RoundState::Streaming { pass } => {
                    self.stream_pass(system_prompt, history, round, pass, chat_id, transport)
                        .await
                }
                RoundState::AwaitingToolResults { pass, calls } => {
                    for call in &calls {
                        round.push(self.tools.dispatch(call, user_id).await);
                    }
                    tool_calls += calls.len();
                    Ok(RoundState::AwaitingToolResults { pass, calls }.after_tool_results())
                }
                other => Ok(other.start()),
            };

            *state = match step {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(user_id, phase, error = %e, "Round failed");
                    failure = Some(e);
                    RoundState::Failed
                }
            };
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(tool_calls),
        }
    }

    async fn stream_pass(
        &self,
        system_prompt: &str,
        history: &[Turn],
        round: &mut Vec<Turn>,
        pass: usize,
        chat_id: ChatId,
        transport: &dyn Transport,
    ) -> Result<RoundState, RoundError> {
        let mut messages = Vec::with_capacity(1 + history.len() + round.len());
        messages.push(Turn::system(system_prompt));
        messages.extend(history.iter().cloned());
        messages.extend(round.iter().cloned());

        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages,
            tools: self.tools.specs(),
        };

        tracing::debug!(
            provider = self.model.name(),
            pass,
            messages = request.messages.len(),
            "Starting streaming pass"
        );
        let stream = self
            .model
            .stream_chat(request)
            .await
            .map_err(RoundError::Model)?;
        let reply = consume_stream(stream, transport, chat_id).await?;

        let next = RoundState::after_reply(pass, &reply.tool_calls, self.settings.max_tool_iterations)?;
        round.push(Turn::assistant(reply.text, reply.tool_calls));
        Ok(next)
    }

    async fn build_system_prompt(&self, user_id: UserId, username: &str) -> anyhow::Result<String> {
        let memories = self.store.list_memories(user_id).await?;
        let memories = memories
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(self
            .settings
            .system_prompt
            .replace("{{USERNAME}}", username)
            .replace("{{MEMORIES}}", &memories))
    }
}

fn time_turn() -> Turn {
    Turn::system(format!(
        "Current time: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatStream;
    use async_trait::async_trait;
    use ember_memory::SqliteStore;
    use tempfile::TempDir;

    struct DownModel;

    #[async_trait]
    impl ModelClient for DownModel {
        fn name(&self) -> &str {
            "down"
        }

        async fn stream_chat(&self, _request: ChatRequest) -> anyhow::Result<ChatStream> {
            anyhow::bail!("connection refused")
        }
    }

    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send_text(&self, _: ChatId, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_typing(&self, _: ChatId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn model_error_drives_round_to_failed() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&tmp.path().join("ember.db")).unwrap());
        let manager = SessionManager::new(
            store.clone(),
            Arc::new(DownModel),
            ToolDispatcher::new(store),
            SessionSettings::from_config(&Config::default()),
        );

        let mut round = vec![Turn::user("hi")];
        let mut state = RoundState::Idle;
        let err = manager
            .drive("sys", &[], &mut round, &mut state, 1, 1, &SilentTransport)
            .await
            .unwrap_err();

        assert!(matches!(err, RoundError::Model(_)));
        assert_eq!(state, RoundState::Failed);
        assert!(state.is_terminal());
        assert_eq!(round, vec![Turn::user("hi")]);
    }

    #[test]
    fn settings_from_config() {
        let mut config = Config::default();
        config.session.max_rounds = 3;
        config.session.max_tool_iterations = 0;
        config.session.typing_interval_secs = 0;

        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings.max_rounds, 3);
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.max_tool_iterations, 1);
        assert_eq!(settings.typing_interval, Duration::from_secs(1));
    }

    #[test]
    fn time_turn_format() {
        let turn = time_turn();
        let text = turn.content();
        assert!(text.starts_with("Current time: "));
        let stamp = &text["Current time: ".len()..];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
