//! Error types and handling
//!
//! This module provides the error taxonomy shared by the conversation engine
//! and its callers. Every failure of a turn maps onto exactly one
//! [`ErrorKind`], so callers branch on the kind instead of on message text.
//!
//! # Error Categories
//!
//! - **Validation**: bad role, content or configuration values, rejected at construction
//! - **NotFound**: lookup miss in the chat store, drives the create path
//! - **IllegalState**: mutating a conversation that has ended
//! - **OverCapacity**: a single message larger than the model's context window
//! - **Upstream**: chat store or model client I/O failure, never retried internally
//! - **Cancelled**: the caller aborted the turn
//!
//! # Security
//!
//! User hints are static strings. They never echo API keys, database paths
//! or message content back to the user.

use thiserror::Error;

/// Result type used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Trait for error extensions
///
/// Provides a user-facing hint and tells a wrapping collaborator whether the
/// same request could succeed if retried.
pub trait ChatErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors may succeed when the turn is retried unchanged.
    /// Non-recoverable errors require different input.
    fn is_recoverable(&self) -> bool;
}

/// Closed classification of [`EngineError`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    IllegalState,
    OverCapacity,
    Upstream,
    Cancelled,
    Config,
    Io,
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{ChatErrorExt, EngineError, ErrorKind};
///
/// let error = EngineError::NotFound { entity: "chat", id: "c-1".to_string() };
/// assert_eq!(error.kind(), ErrorKind::NotFound);
/// assert!(error.is_not_found());
///
/// let too_big = EngineError::OverCapacity { tokens: 12, capacity: 10 };
/// assert!(!too_big.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Message needs {tokens} tokens but the model capacity is {capacity} tokens")]
    OverCapacity { tokens: usize, capacity: usize },

    // Upstream errors
    #[error("Chat store error: {0}")]
    Store(String),

    #[error("Model client error: {0}")]
    ModelClient(String),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Structural classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::OverCapacity { .. } => ErrorKind::OverCapacity,
            Self::Store(_) | Self::ModelClient(_) => ErrorKind::Upstream,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Shorthand for a missing chat
    pub fn chat_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "chat",
            id: id.into(),
        }
    }
}

impl ChatErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Validation(_) => "Invalid message or chat settings",
            Self::NotFound { .. } => "The conversation does not exist yet",
            Self::IllegalState(_) => "This conversation has ended. Start a new one",
            Self::OverCapacity { .. } => "Message is too long for the model. Try a shorter message",
            Self::Store(_) => "Conversation storage is unavailable. Try again",
            Self::ModelClient(_) => "Language model unavailable. Check your API key and network",
            Self::Cancelled => "The request was cancelled",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation(_)
            | Self::IllegalState(_)
            | Self::OverCapacity { .. }
            | Self::Config(_) => false,

            Self::NotFound { .. }
            | Self::Store(_)
            | Self::ModelClient(_)
            | Self::Cancelled
            | Self::Io(_) => true,
        }
    }
}
