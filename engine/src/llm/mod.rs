//! Model Client Abstraction Layer
//!
//! This module provides the streaming completion capability the orchestrator
//! consumes. The ModelClient trait defines the contract a completion backend
//! must implement: given the active messages of a conversation and its
//! generation parameters, produce a finite, non-restartable stream of text
//! deltas.

use async_trait::async_trait;
use futures::stream::BoxStream;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

use crate::chat::{ConversationConfig, Message};

pub mod openai;
pub mod tokens;

/// Result type for model client operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur while talking to a model backend
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        EngineError::ModelClient(err.to_string())
    }
}

/// One incremental fragment of a streamed completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Text appended by this chunk
    pub delta: String,
}

impl CompletionChunk {
    pub fn new(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
        }
    }
}

/// Lazy stream of completion chunks, ended by exhaustion or an error item
pub type ChunkStream = BoxStream<'static, Result<CompletionChunk>>;

/// Streaming completion capability
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the name of the backend (e.g., "openai")
    fn name(&self) -> &str;

    /// Open a streaming completion over `messages`
    ///
    /// # Arguments
    /// * `messages` - Active messages of the conversation, oldest first
    /// * `config` - Model and sampling parameters of the conversation
    ///
    /// # Returns
    /// * `Ok(ChunkStream)` - Deltas in generation order
    /// * `Err(LLMError)` - If the request could not be opened
    async fn stream_completion(
        &self,
        messages: &[Message],
        config: &ConversationConfig,
    ) -> Result<ChunkStream>;
}
