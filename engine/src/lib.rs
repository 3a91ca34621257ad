//! Chatstream Engine Library
//!
//! This library provides the conversation engine behind the `chatstream`
//! binary: a token-bounded conversation context and a streaming completion
//! orchestrator. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Conversation domain model
pub mod chat;

/// Database persistence module
pub mod db;

/// Model client abstraction layer
pub mod llm;

/// Turn orchestration module
pub mod orchestrator;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

// Re-export commonly used types
pub use chat::{ChatStatus, ConversationConfig, ConversationContext, Message, Model, Role};
pub use db::{ChatStore, Database, InMemoryChatStore, SqliteChatStore};
pub use llm::tokens::{HeuristicTokenCounter, TiktokenCounter, TokenCounter};
pub use llm::{ChunkStream, CompletionChunk, LLMError, ModelClient};
pub use orchestrator::{CompletionOrchestrator, TurnHandle, TurnState};
