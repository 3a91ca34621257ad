//! Configuration management
//!
//! This module handles loading, validation, and management of the chatstream
//! configuration. Configuration is stored in TOML format at
//! ~/.chatstream/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Completion endpoint and where to find the API key
//! - **chat**: Parameters for newly created conversations
//! - **stream**: Output channel sizing
//!
//! # Path Expansion
//!
//! `~` in `core.data_dir` is expanded to the user's home directory and the
//! directory is created on load.
//!
//! # Examples
//!
//! ```no_run
//! use chatstream_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Database: {:?}", config.database_path());
//! println!("Default model: {}", config.chat.model);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::types::TurnConfigInput;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::ConversationConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Completion endpoint settings
    pub llm: LLMConfig,

    /// Defaults for new conversations
    #[serde(default)]
    pub chat: ChatDefaults,

    /// Output stream settings
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Upper bound for one completion request, stream included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    // Note: the API key itself is never written to the config file
}

/// Parameters used when a turn creates a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDefaults {
    #[serde(default = "default_model")]
    pub model: String,

    /// Context window of the model, in tokens
    #[serde(default = "default_model_max_tokens")]
    pub model_max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

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

    #[serde(default = "default_initial_system_message")]
    pub initial_system_message: String,
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            model_max_tokens: default_model_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            n: default_n(),
            stop: Vec::new(),
            max_tokens: 0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            initial_system_message: default_initial_system_message(),
        }
    }
}

impl ChatDefaults {
    /// Turn config carrying these defaults
    pub fn to_turn_config(&self) -> TurnConfigInput {
        TurnConfigInput {
            model: self.model.clone(),
            model_max_tokens: self.model_max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            n: self.n,
            stop: self.stop.clone(),
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            initial_system_message: self.initial_system_message.clone(),
        }
    }
}

/// Output stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the per-turn snapshot channel
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.chatstream")
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_model_max_tokens() -> usize {
    128_000
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

fn default_initial_system_message() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_buffer_size() -> usize {
    crate::orchestrator::DEFAULT_STREAM_BUFFER
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.chatstream/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        // Serialize before processing so the file keeps the unexpanded `~`
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        config.validate_and_process()?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.chatstream/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".chatstream").join("config.toml"))
    }

    /// Create a default configuration
    fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            chat: ChatDefaults::default(),
            stream: StreamConfig::default(),
        }
    }

    /// SQLite file holding the conversations
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("chats.db")
    }

    /// API key read from the configured environment variable
    ///
    /// Returns `None` when the variable is unset or empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.request_timeout_secs)
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and endpoint settings
    /// - Checks the new-conversation defaults against conversation rules
    /// - Expands ~ in the data directory and creates it
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.llm.base_url.trim().is_empty() {
            return Err(EngineError::Config("llm.base_url must not be empty".to_string()));
        }
        if self.llm.api_key_env.trim().is_empty() {
            return Err(EngineError::Config(
                "llm.api_key_env must not be empty".to_string(),
            ));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.stream.buffer_size == 0 {
            return Err(EngineError::Config(
                "stream.buffer_size must be at least 1".to_string(),
            ));
        }

        ConversationConfig::from_input(&self.chat.to_turn_config())
            .map_err(|e| EngineError::Config(format!("Invalid [chat] defaults: {}", e)))?;
        if self.chat.initial_system_message.is_empty() {
            return Err(EngineError::Config(
                "chat.initial_system_message must not be empty".to_string(),
            ));
        }

        // Expand and create data directory
        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
///
/// # Examples
///
/// ```ignore
/// let path = PathBuf::from("~/.chatstream");
/// let expanded = expand_path(&path)?;
/// // expanded is now /home/user/.chatstream (on Unix)
/// ```
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.chat.model, "gpt-4o-mini");
        assert_eq!(config.stream.buffer_size, 16);
    }

    #[test]
    fn test_default_chat_defaults_are_valid() {
        let config = Config::default_config();
        assert!(ConversationConfig::from_input(&config.chat.to_turn_config()).is_ok());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_expand_path_tilde_only() {
        let path = PathBuf::from("~");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.llm.base_url, deserialized.llm.base_url);
        assert_eq!(config.chat.model_max_tokens, deserialized.chat.model_max_tokens);
    }

    #[test]
    fn test_database_path_under_data_dir() {
        let mut config = Config::default_config();
        config.core.data_dir = PathBuf::from("/var/lib/chatstream");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/chatstream/chats.db")
        );
    }
}
