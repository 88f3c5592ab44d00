use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating input at the boundary
///
/// Any of these rejects the whole request; nothing reaches the archive or
/// the ingestion buffer.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Entry {index}: invalid timestamp '{value}'")]
    InvalidTimestamp { index: usize, value: String },

    #[error("Entry {index}: unknown log level '{value}'")]
    InvalidLevel { index: usize, value: String },

    #[error("Entry {index}: {reason}")]
    MalformedEntry { index: usize, reason: String },

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Errors that can occur in the persistent advisory store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row in '{table}': {reason}")]
    Corrupt { table: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors reported by a pattern detection agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent '{agent}' failed: {reason}")]
    Failed { agent: String, reason: String },

    #[error("Agent '{agent}' timed out after {timeout:?}")]
    Timeout { agent: String, timeout: Duration },

    #[error("Agent '{agent}' panicked")]
    Panicked { agent: String },

    #[error("Failed to spawn agent '{agent}': {source}")]
    Spawn {
        agent: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the engine's boundary operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
