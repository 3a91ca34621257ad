//! Turn input/output types
//!
//! These are the values a caller exchanges with the completion orchestrator:
//! one [`TurnInput`] per turn, and a stream of [`TurnOutput`] snapshots whose
//! last element equals the turn's final result.

use serde::{Deserialize, Serialize};

/// Generation parameters for a brand-new conversation
///
/// Only consulted when the turn's chat id does not resolve to an existing
/// conversation. Range checks happen when the engine builds the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnConfigInput {
    /// Model name sent to the completion API
    pub model: String,

    /// Context window of the model, in tokens
    pub model_max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Number of completions to sample
    #[serde(default = "default_n")]
    pub n: u32,

    #[serde(default)]
    pub stop: Vec<String>,

    /// Maximum tokens to generate, 0 leaves the limit to the model
    #[serde(default)]
    pub max_tokens: u32,

    #[serde(default)]
    pub presence_penalty: f32,

    #[serde(default)]
    pub frequency_penalty: f32,

    /// Content of the system message that opens the conversation
    pub initial_system_message: String,
}

impl TurnConfigInput {
    /// Create a config input with default sampling parameters
    pub fn new(
        model: impl Into<String>,
        model_max_tokens: usize,
        initial_system_message: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            model_max_tokens,
            temperature: default_temperature(),
            top_p: default_top_p(),
            n: default_n(),
            stop: Vec::new(),
            max_tokens: 0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            initial_system_message: initial_system_message.into(),
        }
    }
}

/// Input for one request/response turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    /// Conversation to resume, or the id to give a new conversation
    pub chat_id: String,

    pub user_id: String,

    pub user_message: String,

    /// Required only when `chat_id` does not resolve yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TurnConfigInput>,
}

impl TurnInput {
    /// Create a turn input for an existing conversation
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_message: user_message.into(),
            config: None,
        }
    }

    /// Attach the parameters used if the conversation has to be created
    pub fn with_config(mut self, config: TurnConfigInput) -> Self {
        self.config = Some(config);
        self
    }
}

/// Snapshot of a turn's output
///
/// `content` is always the cumulative text produced so far. Each snapshot
/// replaces the previous one; consumers must not concatenate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutput {
    pub chat_id: String,
    pub user_id: String,
    pub content: String,
}

impl TurnOutput {
    /// Create a new snapshot
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            content: content.into(),
        }
    }

    /// Text not yet shown by a consumer that already displayed `previous`
    ///
    /// Returns the whole content when `previous` is not a prefix of it.
    pub fn delta_since(&self, previous: &str) -> &str {
        self.content
            .strip_prefix(previous)
            .unwrap_or(&self.content)
    }
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

fn default_n() -> u32 {
    1
}
