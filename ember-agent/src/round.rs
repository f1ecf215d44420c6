//! Round state machine.
//!
//! ```text
//! Idle ─► Streaming ─┬─ no tool calls ──► Done
//!            ▲       └─ tool calls ─────► AwaitingToolResults ─┐
//!            └─────────────────────────────────────────────────┘
//! any state ─ error ─► Failed
//! ```

use crate::error::RoundError;
use ember_common::ToolCall;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RoundState {
    #[default]
    Idle,
    /// Streaming pass `pass` (1-based) is in flight.
    Streaming { pass: usize },
    /// The assistant asked for tools; their results must be appended next.
    AwaitingToolResults { pass: usize, calls: Vec<ToolCall> },
    Done,
    Failed,
}

impl RoundState {
    pub fn start(self) -> Self {
        match self {
            RoundState::Idle => RoundState::Streaming { pass: 1 },
            other => other,
        }
    }

    /// Transition after streaming pass `pass` produced `tool_calls`.
    ///
    /// A pass that still requests tools once `max_passes` passes have run
    /// ends the round with [`RoundError::ToolLoopExceeded`].
    pub fn after_reply(
        pass: usize,
        tool_calls: &[ToolCall],
        max_passes: usize,
    ) -> Result<Self, RoundError> {
        if tool_calls.is_empty() {
            return Ok(RoundState::Done);
        }
        if pass >= max_passes {
            return Err(RoundError::ToolLoopExceeded(max_passes));
        }
        Ok(RoundState::AwaitingToolResults {
            pass,
            calls: tool_calls.to_vec(),
        })
    }

    /// Transition once every pending tool call has a result.
    pub fn after_tool_results(self) -> Self {
        match self {
            RoundState::AwaitingToolResults { pass, .. } => RoundState::Streaming { pass: pass + 1 },
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundState::Done | RoundState::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoundState::Idle => "idle",
            RoundState::Streaming { .. } => "streaming",
            RoundState::AwaitingToolResults { .. } => "awaiting_tool_results",
            RoundState::Done => "done",
            RoundState::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "create_memory", "{}")
    }

    #[test]
    fn idle_starts_first_pass() {
        assert_eq!(RoundState::default().start(), RoundState::Streaming { pass: 1 });
        assert_eq!(RoundState::Done.start(), RoundState::Done);
    }

    #[test]
    fn reply_without_tools_is_done() {
        assert_eq!(RoundState::after_reply(1, &[], 10).unwrap(), RoundState::Done);
        assert_eq!(RoundState::after_reply(10, &[], 10).unwrap(), RoundState::Done);
    }

    #[test]
    fn tools_lead_to_another_pass() {
        let state = RoundState::after_reply(1, &[call("a"), call("b")], 10).unwrap();
        assert_eq!(
            state,
            RoundState::AwaitingToolResults {
                pass: 1,
                calls: vec![call("a"), call("b")]
            }
        );
        assert!(!state.is_terminal());
        assert_eq!(state.after_tool_results(), RoundState::Streaming { pass: 2 });
    }

    #[test]
    fn tool_loop_is_bounded() {
        assert!(RoundState::after_reply(9, &[call("a")], 10).is_ok());
        let err = RoundState::after_reply(10, &[call("a")], 10).unwrap_err();
        assert!(matches!(err, RoundError::ToolLoopExceeded(10)));
    }

    #[test]
    fn terminal_states() {
        assert!(RoundState::Done.is_terminal());
        assert!(RoundState::Failed.is_terminal());
        assert!(!RoundState::Streaming { pass: 1 }.is_terminal());
        assert_eq!(RoundState::Failed.label(), "failed");
    }
}
