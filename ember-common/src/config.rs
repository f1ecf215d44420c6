//! Configuration management for Ember.
//!
//! The bot reads a single JSON file at `~/.ember/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (EMBER_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `EMBER_TELEGRAM_TOKEN` → telegram.bot_token
//! - `EMBER_API_KEY` (or `OPENAI_API_KEY`) → llm.api_key
//! - `EMBER_BASE_URL` → llm.base_url
//! - `EMBER_MODEL` → llm.model
//! - `EMBER_MAX_ROUNDS` → session.max_rounds
//! - `EMBER_DB_PATH` → storage.database_path
//! - `EMBER_LOG_LEVEL` → observability.log_level
//! - `EMBER_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".ember"),
        |dirs| dirs.home_dir().join(".ember"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,

    /// Base URL of the Bot API; overridable for self-hosted API servers.
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout() -> u64 {
    30
}

// ============================================================================
// LLM
// ============================================================================

/// OpenAI-compatible completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

// ============================================================================
// Session
// ============================================================================

/// Conversation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum user rounds kept in memory. Zero or negative keeps everything.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: i64,

    /// System prompt template. `{{USERNAME}}` and `{{MEMORIES}}` are substituted per round.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Streaming passes allowed per round before the tool loop is aborted.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    #[serde(default = "default_typing_interval")]
    pub typing_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            system_prompt: default_system_prompt(),
            max_tool_iterations: default_max_tool_iterations(),
            typing_interval_secs: default_typing_interval(),
        }
    }
}

fn default_max_rounds() -> i64 {
    20
}

fn default_system_prompt() -> String {
    "You are Ember, a friendly assistant chatting with {{USERNAME}} on Telegram. \
     Keep answers short and plain. When the user tells you something worth keeping \
     about themselves, store it with the create_memory tool.\n\n\
     What you remember about {{USERNAME}}:\n{{MEMORIES}}"
        .into()
}

fn default_max_tool_iterations() -> usize {
    10
}

fn default_typing_interval() -> u64 {
    6
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. A leading `~` is expanded.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.ember/ember.db".into()
}

impl StorageConfig {
    /// Resolve the database path with `~` and `$VAR` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        let expanded = shellexpand::full(&self.database_path)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.database_path.clone());
        PathBuf::from(expanded)
    }
}

// ============================================================================
// Observability
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var("EMBER_TELEGRAM_TOKEN") {
            self.telegram.bot_token = token;
        }

        if let Some(key) = var("EMBER_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            self.llm.api_key = key;
        }
        if let Some(url) = var("EMBER_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = var("EMBER_MODEL") {
            self.llm.model = model;
        }

        if let Some(rounds) = var("EMBER_MAX_ROUNDS") {
            match rounds.parse() {
                Ok(n) => self.session.max_rounds = n,
                Err(_) => tracing::warn!(value = %rounds, "Ignoring invalid EMBER_MAX_ROUNDS"),
            }
        }

        if let Some(path) = var("EMBER_DB_PATH") {
            self.storage.database_path = path;
        }

        if let Some(level) = var("EMBER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = var("EMBER_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Check that the settings needed to serve traffic are present.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(Error::Config(
                "telegram.bot_token is empty (set EMBER_TELEGRAM_TOKEN)".into(),
            ));
        }
        if self.llm.api_key.trim().is_empty() {
            return Err(Error::Config(
                "llm.api_key is empty (set EMBER_API_KEY)".into(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(Error::Config("llm.model is empty".into()));
        }
        Ok(())
    }
}
