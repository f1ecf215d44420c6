//! Ember Agent - the conversation session engine.
//!
//! One round of conversation for one user:
//!
//! ```text
//! input ─► SessionManager ─► ModelClient (SSE) ─► StreamAccumulator ─► Transport
//!               ▲                                       │
//!               └──── ToolDispatcher ◄── tool calls ────┘
//!               │
//!               └──► HistoryStore (one transaction per round), retention trim
//! ```
//!
//! Sessions are locked per user, so rounds for different users run in
//! parallel while a single user's rounds are strictly serialised.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod accumulator;
pub mod error;
pub mod manager;
pub mod openai;
pub mod provider;
pub mod round;
pub mod session;
pub mod sse;
pub mod transport;
pub mod typing;

pub use accumulator::{consume_stream, AssistantReply, StreamAccumulator};
pub use error::RoundError;
pub use manager::{RoundSummary, SessionManager, SessionSettings, SessionStats};
pub use openai::OpenAiClient;
pub use provider::{ChatRequest, ChatStream, ModelClient, StreamEvent};
pub use round::RoundState;
pub use session::{count_user_turns, trim_to_rounds, Session};
pub use transport::Transport;
pub use typing::TypingIndicator;
