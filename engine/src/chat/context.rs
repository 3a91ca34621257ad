//! Conversation context
//!
//! Keeps the messages of a conversation within the model's context window.
//! Messages are stored in order (system prompt, user messages, assistant
//! responses). When a new message does not fit, the oldest active messages
//! are evicted first-in-first-out into a separate log that is kept for
//! history but never sent to the model again.
//!
//! Invariants after every successful [`ConversationContext::add_message`]:
//! - `token_usage() == sum of tokens over active_messages()`
//! - `token_usage() <= model capacity`
//! - the evicted log only grows, in eviction order

use sdk::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::ConversationConfig;
use super::message::Message;

/// Lifecycle status of a conversation
///
/// The only legal transition is `Active -> Ended`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Active,
    Ended,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Active => "active",
            ChatStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatStatus {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "active" => Ok(ChatStatus::Active),
            "ended" => Ok(ChatStatus::Ended),
            other => Err(EngineError::Validation(format!(
                "Invalid chat status '{}'",
                other
            ))),
        }
    }
}

/// Stored state of a conversation, as loaded by a chat store
#[derive(Debug, Clone)]
pub struct ConversationParts {
    pub id: String,
    pub user_id: String,
    pub initial_system_message: Message,
    pub active: Vec<Message>,
    pub evicted: Vec<Message>,
    pub status: ChatStatus,
    /// Token usage as persisted; recomputed on load
    pub stored_token_usage: Option<usize>,
    pub config: ConversationConfig,
}

/// Token-bounded conversation buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    id: String,
    user_id: String,
    initial_system_message: Message,
    active: Vec<Message>,
    evicted: Vec<Message>,
    status: ChatStatus,
    token_usage: usize,
    config: ConversationConfig,
}

impl ConversationContext {
    /// Create a new conversation with a generated id
    ///
    /// The initial system message goes through the same append path as any
    /// other message.
    pub fn new(
        user_id: impl Into<String>,
        initial_system_message: Message,
        config: ConversationConfig,
    ) -> Result<Self> {
        Self::with_id(
            Uuid::new_v4().to_string(),
            user_id,
            initial_system_message,
            config,
        )
    }

    /// Create a new conversation with a caller-chosen id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` for an empty id or user id or an
    /// invalid config, and `EngineError::OverCapacity` if the system message
    /// alone exceeds the model capacity.
    pub fn with_id(
        id: impl Into<String>,
        user_id: impl Into<String>,
        initial_system_message: Message,
        config: ConversationConfig,
    ) -> Result<Self> {
        let mut chat = Self {
            id: id.into(),
            user_id: user_id.into(),
            initial_system_message: initial_system_message.clone(),
            active: Vec::new(),
            evicted: Vec::new(),
            status: ChatStatus::Active,
            token_usage: 0,
            config,
        };
        chat.validate()?;
        chat.add_message(initial_system_message)?;

        Ok(chat)
    }

    /// Rebuild a persisted conversation
    ///
    /// Token usage is recomputed from the active messages; a stored value
    /// that disagrees is logged and discarded.
    pub fn from_parts(parts: ConversationParts) -> Result<Self> {
        let mut chat = Self {
            id: parts.id,
            user_id: parts.user_id,
            initial_system_message: parts.initial_system_message,
            active: parts.active,
            evicted: parts.evicted,
            status: parts.status,
            token_usage: 0,
            config: parts.config,
        };
        chat.validate()?;
        chat.refresh_token_usage();

        if let Some(stored) = parts.stored_token_usage {
            if stored != chat.token_usage {
                warn!(
                    chat_id = %chat.id,
                    stored,
                    recomputed = chat.token_usage,
                    "stored token usage disagrees with active messages"
                );
            }
        }

        Ok(chat)
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Validation("Chat id is empty".to_string()));
        }
        if self.user_id.trim().is_empty() {
            return Err(EngineError::Validation("User id is empty".to_string()));
        }
        self.config.validate()
    }

    /// Append a message, evicting the oldest active messages until it fits
    ///
    /// # Errors
    ///
    /// - `EngineError::IllegalState` if the conversation has ended
    /// - `EngineError::OverCapacity` if the message alone exceeds the model
    ///   capacity
    ///
    /// Both buffers are left untouched on error.
    pub fn add_message(&mut self, message: Message) -> Result<()> {
        if self.status == ChatStatus::Ended {
            return Err(EngineError::IllegalState(format!(
                "Chat {} is ended, no more messages allowed",
                self.id
            )));
        }

        let capacity = self.config.model.max_tokens();
        if message.tokens() > capacity {
            return Err(EngineError::OverCapacity {
                tokens: message.tokens(),
                capacity,
            });
        }

        let mut evicted = 0usize;
        while message.tokens() + self.token_usage > capacity && !self.active.is_empty() {
            let oldest = self.active.remove(0);
            self.evicted.push(oldest);
            self.refresh_token_usage();
            evicted += 1;
        }

        if evicted > 0 {
            debug!(
                chat_id = %self.id,
                evicted,
                token_usage = self.token_usage,
                "evicted messages to fit context window"
            );
        }

        self.active.push(message);
        self.refresh_token_usage();

        Ok(())
    }

    /// Mark the conversation as ended
    ///
    /// Ending an already ended conversation is a no-op.
    pub fn end(&mut self) {
        self.status = ChatStatus::Ended;
    }

    pub fn is_ended(&self) -> bool {
        self.status == ChatStatus::Ended
    }

    fn refresh_token_usage(&mut self) {
        self.token_usage = self.active.iter().map(Message::tokens).sum();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn initial_system_message(&self) -> &Message {
        &self.initial_system_message
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Sum of the token counts of the active messages
    pub fn token_usage(&self) -> usize {
        self.token_usage
    }

    /// Messages currently in context, oldest first
    pub fn active_messages(&self) -> &[Message] {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Messages removed from context, oldest eviction first
    pub fn evicted_messages(&self) -> &[Message] {
        &self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::config::Model;
    use crate::chat::message::Role;
    use crate::llm::tokens::TokenCounter;

    /// Counts whitespace-separated words
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, _model: &str, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn config(capacity: usize) -> ConversationConfig {
        ConversationConfig::new(Model::new("test-model", capacity).unwrap())
    }

    fn message(role: Role, content: &str, config: &ConversationConfig) -> Message {
        Message::new(role, content, &config.model, &WordCounter).unwrap()
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    #[test]
    fn test_new_chat_absorbs_system_message() {
        let config = config(100);
        let system = message(Role::System, "You are helpful", &config);
        let chat = ConversationContext::new("user-1", system.clone(), config).unwrap();

        assert_eq!(chat.status(), ChatStatus::Active);
        assert_eq!(chat.active_count(), 1);
        assert_eq!(chat.active_messages()[0], system);
        assert_eq!(chat.initial_system_message(), &system);
        assert_eq!(chat.token_usage(), 3);
        assert!(chat.evicted_messages().is_empty());
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let config = config(100);
        let system = message(Role::System, "system", &config);
        let err = ConversationContext::new("", system, config).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = config(100).with_temperature(5.0);
        let system = message(Role::System, "system", &config);
        let err = ConversationContext::new("user-1", system, config).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_capacity_boundary_evicts_oldest() {
        let config = config(10);
        let first = message(Role::System, &words(4), &config);
        let mut chat = ConversationContext::new("user-1", first.clone(), config.clone()).unwrap();
        chat.add_message(message(Role::User, &words(3), &config)).unwrap();
        chat.add_message(message(Role::Assistant, &words(2), &config)).unwrap();
        assert_eq!(chat.token_usage(), 9);

        chat.add_message(message(Role::User, &words(3), &config)).unwrap();

        assert_eq!(chat.token_usage(), 8);
        assert_eq!(chat.evicted_messages(), &[first]);
        let tokens: Vec<usize> = chat.active_messages().iter().map(Message::tokens).collect();
        assert_eq!(tokens, vec![3, 2, 3]);
    }

    #[test]
    fn test_exact_fit_does_not_evict() {
        let config = config(10);
        let system = message(Role::System, &words(4), &config);
        let mut chat = ConversationContext::new("user-1", system, config.clone()).unwrap();
        chat.add_message(message(Role::User, &words(6), &config)).unwrap();
        assert_eq!(chat.token_usage(), 10);
        assert!(chat.evicted_messages().is_empty());
    }

    #[test]
    fn test_eviction_can_empty_buffer() {
        let config = config(10);
        let system = message(Role::System, &words(2), &config);
        let mut chat = ConversationContext::new("user-1", system, config.clone()).unwrap();
        chat.add_message(message(Role::User, &words(3), &config)).unwrap();

        chat.add_message(message(Role::Assistant, &words(10), &config)).unwrap();

        assert_eq!(chat.active_count(), 1);
        assert_eq!(chat.token_usage(), 10);
        assert_eq!(chat.evicted_messages().len(), 2);
    }

    #[test]
    fn test_single_oversize_message_rejected() {
        let config = config(10);
        let system = message(Role::System, &words(2), &config);
        let mut chat = ConversationContext::new("user-1", system, config.clone()).unwrap();
        let before = chat.clone();

        let err = chat.add_message(message(Role::User, &words(11), &config)).unwrap_err();

        assert!(matches!(
            err,
            EngineError::OverCapacity {
                tokens: 11,
                capacity: 10
            }
        ));
        assert_eq!(chat, before);
    }

    #[test]
    fn test_oversize_system_message_rejected_at_creation() {
        let config = config(5);
        let system = message(Role::System, &words(6), &config);
        let err = ConversationContext::new("user-1", system, config).unwrap_err();
        assert!(matches!(err, EngineError::OverCapacity { .. }));
    }

    #[test]
    fn test_ended_chat_rejects_messages() {
        let config = config(100);
        let system = message(Role::System, "system", &config);
        let mut chat = ConversationContext::new("user-1", system, config.clone()).unwrap();
        chat.end();
        let before = chat.clone();

        let err = chat.add_message(message(Role::User, "hello", &config)).unwrap_err();

        assert!(matches!(err, EngineError::IllegalState(_)));
        assert_eq!(chat, before);
    }

    #[test]
    fn test_end_is_idempotent() {
        let config = config(100);
        let system = message(Role::System, "system", &config);
        let mut chat = ConversationContext::new("user-1", system, config).unwrap();
        chat.end();
        chat.end();
        assert!(chat.is_ended());
        assert_eq!(chat.status(), ChatStatus::Ended);
    }

    #[test]
    fn test_from_parts_recomputes_token_usage() {
        let config = config(100);
        let system = message(Role::System, "one two", &config);
        let user = message(Role::User, "three four five", &config);
        let evicted = message(Role::User, "old", &config);

        let chat = ConversationContext::from_parts(ConversationParts {
            id: "chat-1".to_string(),
            user_id: "user-1".to_string(),
            initial_system_message: system.clone(),
            active: vec![system, user],
            evicted: vec![evicted],
            status: ChatStatus::Ended,
            stored_token_usage: Some(999),
            config,
        })
        .unwrap();

        assert_eq!(chat.id(), "chat-1");
        assert_eq!(chat.token_usage(), 5);
        assert_eq!(chat.evicted_messages().len(), 1);
        assert!(chat.is_ended());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("active".parse::<ChatStatus>().unwrap(), ChatStatus::Active);
        assert_eq!("ended".parse::<ChatStatus>().unwrap(), ChatStatus::Ended);
        assert!("Active".parse::<ChatStatus>().is_err());
        assert!("archived".parse::<ChatStatus>().is_err());
    }
}
