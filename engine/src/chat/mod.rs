//! Conversation domain model
//!
//! Messages, per-conversation configuration and the token-bounded
//! conversation context.

pub mod config;
pub mod context;
pub mod message;

pub use config::{ConversationConfig, Model};
pub use context::{ChatStatus, ConversationContext, ConversationParts};
pub use message::{Message, Role};
