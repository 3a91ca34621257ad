//! Conversation messages
//!
//! A [`Message`] is immutable once constructed. Its token count is computed
//! exactly once, at creation, with the model that owns the conversation.

use chrono::{DateTime, Utc};
use sdk::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::config::Model;
use crate::llm::tokens::TokenCounter;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,

    /// User message
    User,

    /// Assistant message
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(EngineError::Validation(format!(
                "Invalid role '{}'. Must be one of: system, user, assistant",
                other
            ))),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    role: Role,
    content: String,
    tokens: usize,
    /// Name of the model the tokens were counted with
    model: String,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message, counting its tokens with `counter`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if the content is empty or the
    /// creation timestamp cannot be established.
    pub fn new(
        role: Role,
        content: impl Into<String>,
        model: &Model,
        counter: &dyn TokenCounter,
    ) -> Result<Self> {
        let content = content.into();
        let tokens = counter.count(model.name(), &content);

        let message = Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tokens,
            model: model.name().to_string(),
            created_at: Utc::now(),
        };
        message.validate()?;

        Ok(message)
    }

    /// Create a new message from a raw role string
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if the role is not one of
    /// `system`, `user` or `assistant`, in addition to the checks of [`Message::new`].
    pub fn parse(
        role: &str,
        content: impl Into<String>,
        model: &Model,
        counter: &dyn TokenCounter,
    ) -> Result<Self> {
        Self::new(role.parse()?, content, model, counter)
    }

    /// Rebuild a previously stored message without recounting its tokens
    pub fn restore(
        id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        tokens: usize,
        model: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let message = Self {
            id: id.into(),
            role,
            content: content.into(),
            tokens,
            model: model.into(),
            created_at,
        };
        message.validate()?;

        Ok(message)
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::Validation("Message id is empty".to_string()));
        }
        if self.content.is_empty() {
            return Err(EngineError::Validation(
                "Message content is empty".to_string(),
            ));
        }
        if self.created_at.timestamp_nanos_opt().unwrap_or(0) <= 0 {
            return Err(EngineError::Validation(
                "Message creation timestamp is not set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Token count computed at creation
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tokens::HeuristicTokenCounter;

    fn model() -> Model {
        Model::new("gpt-4o-mini", 1000).unwrap()
    }

    #[test]
    fn test_message_creation() {
        let counter = HeuristicTokenCounter::new();
        let message = Message::new(Role::User, "Hello there", &model(), &counter).unwrap();

        assert_eq!(message.role(), Role::User);
        assert_eq!(message.content(), "Hello there");
        assert_eq!(message.tokens(), 3);
        assert_eq!(message.model(), "gpt-4o-mini");
        assert!(!message.id().is_empty());
        assert!(message.created_at().timestamp() > 0);
    }

    #[test]
    fn test_message_ids_are_unique() {
        let counter = HeuristicTokenCounter::new();
        let a = Message::new(Role::User, "a", &model(), &counter).unwrap();
        let b = Message::new(Role::User, "a", &model(), &counter).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_empty_content_rejected() {
        let counter = HeuristicTokenCounter::new();
        let err = Message::new(Role::Assistant, "", &model(), &counter).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_invalid_role_rejected() {
        let counter = HeuristicTokenCounter::new();
        for role in ["tool", "System", "USER", "", "function"] {
            let err = Message::parse(role, "content", &model(), &counter).unwrap_err();
            assert!(
                matches!(err, EngineError::Validation(_)),
                "role {role:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_valid_roles_parse() {
        let counter = HeuristicTokenCounter::new();
        for (raw, role) in [
            ("system", Role::System),
            ("user", Role::User),
            ("assistant", Role::Assistant),
        ] {
            let message = Message::parse(raw, "content", &model(), &counter).unwrap();
            assert_eq!(message.role(), role);
            assert_eq!(message.role().to_string(), raw);
        }
    }

    #[test]
    fn test_restore_keeps_stored_tokens() {
        let created_at = Utc::now();
        let message =
            Message::restore("m-1", Role::User, "Hello", 42, "gpt-4o-mini", created_at).unwrap();
        assert_eq!(message.tokens(), 42);
        assert_eq!(message.id(), "m-1");
        assert_eq!(message.created_at(), created_at);
    }

    #[test]
    fn test_restore_rejects_unset_timestamp() {
        let err = Message::restore(
            "m-1",
            Role::User,
            "Hello",
            2,
            "gpt-4o-mini",
            DateTime::<Utc>::UNIX_EPOCH,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
