//! Per-conversation generation parameters

use sdk::errors::{EngineError, Result};
use sdk::types::TurnConfigInput;
use serde::{Deserialize, Serialize};

/// Target model of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    name: String,
    /// Context window capacity in tokens
    max_tokens: usize,
}

impl Model {
    /// Create a model reference
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if the name is blank or the
    /// capacity is zero.
    pub fn new(name: impl Into<String>, max_tokens: usize) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::Validation("Model name is empty".to_string()));
        }
        if max_tokens == 0 {
            return Err(EngineError::Validation(format!(
                "Model '{}' must have a token capacity greater than 0",
                name
            )));
        }
        Ok(Self { name, max_tokens })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

/// Generation parameters of a conversation
///
/// Built once when the conversation is created and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub model: Model,

    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,

    /// Nucleus sampling mass (0.0-1.0)
    pub top_p: f32,

    /// Number of completions to sample (>= 1)
    pub n: u32,

    /// Sequences where the model stops generating
    pub stop: Vec<String>,

    /// Maximum tokens to generate, 0 leaves the limit to the model
    pub max_tokens: u32,

    /// Presence penalty (-2.0-2.0)
    pub presence_penalty: f32,

    /// Frequency penalty (-2.0-2.0)
    pub frequency_penalty: f32,
}

impl ConversationConfig {
    /// Create a config with default sampling parameters
    pub fn new(model: Model) -> Self {
        Self {
            model,
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            stop: Vec::new(),
            max_tokens: 0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }

    /// Build and validate a config from caller input
    pub fn from_input(input: &TurnConfigInput) -> Result<Self> {
        let model = Model::new(input.model.clone(), input.model_max_tokens)?;
        let config = Self {
            model,
            temperature: input.temperature,
            top_p: input.top_p,
            n: input.n,
            stop: input.stop.clone(),
            max_tokens: input.max_tokens,
            presence_penalty: input.presence_penalty,
            frequency_penalty: input.frequency_penalty,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_n(mut self, n: u32) -> Self {
        self.n = n;
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_presence_penalty(mut self, presence_penalty: f32) -> Self {
        self.presence_penalty = presence_penalty;
        self
    }

    pub fn with_frequency_penalty(mut self, frequency_penalty: f32) -> Self {
        self.frequency_penalty = frequency_penalty;
        self
    }

    /// Check every parameter range
    ///
    /// NaN values fail every range check.
    pub fn validate(&self) -> Result<()> {
        if self.model.max_tokens() == 0 {
            return Err(EngineError::Validation(
                "Model token capacity must be greater than 0".to_string(),
            ));
        }
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        if self.n < 1 {
            return Err(EngineError::Validation("n must be at least 1".to_string()));
        }
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        Ok(())
    }
}

fn check_range(name: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )))
    }
}
