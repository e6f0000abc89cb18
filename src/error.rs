//! Error types for sqlmend.
//!
//! Defines the main error enum used throughout the crate. Expected misuse
//! (unsafe SQL, hostile analysis code, failing queries inside the correction
//! loop) is reported through structured verdicts and outcomes instead; this
//! type covers faults of the collaborators themselves.

use thiserror::Error;

/// Main error type for sqlmend operations.
#[derive(Error, Debug)]
pub enum MendError {
    /// Datastore connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors reported by the datastore.
    #[error("Query error: {0}")]
    Query(String),

    /// A datastore call exceeded its time budget.
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// LLM API errors (rate limits, auth, timeouts, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error memory store errors (open, migrate, read, write).
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Sandbox plumbing errors (interpreter missing, broken pipe, bad reply).
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MendError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a timeout error with the given message.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates a sandbox error with the given message.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error is a datastore timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Timeout(_) => "Timeout Error",
            Self::Llm(_) => "LLM Error",
            Self::Config(_) => "Configuration Error",
            Self::Persistence(_) => "Persistence Error",
            Self::Sandbox(_) => "Sandbox Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using MendError.
pub type Result<T> = std::result::Result<T, MendError>;
