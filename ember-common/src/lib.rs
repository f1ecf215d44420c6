//! Ember Common - Shared types, configuration, and logging for Ember.
//!
//! This crate provides:
//! - The conversation data model (`Turn`, `ToolCall`) in its persisted/wire form
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod turn;

pub use config::{
    Config, LlmConfig, ObservabilityConfig, SessionConfig, StorageConfig, TelegramConfig,
};
pub use error::{Error, Result};
pub use turn::{FunctionCall, ToolCall, Turn};

/// Telegram user identifier.
pub type UserId = i64;

/// Telegram chat identifier.
pub type ChatId = i64;
