//! Error types for Ember.

use thiserror::Error;

/// Result type alias using the Ember error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while preparing the process to serve.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
