//! Token counting
//!
//! Token counts drive context-window accounting. Counting is an injected
//! capability. The engine ships a BPE counter for OpenAI model families
//! ([`TiktokenCounter`]) and a deterministic character-based estimate
//! ([`HeuristicTokenCounter`]) used for every other model.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Default number of characters per token for the heuristic counter
/// (rough estimate: 1 token ≈ 4 characters)
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Maps (model name, text) to a token count
///
/// Implementations must be pure and deterministic: the same model and text
/// always produce the same count.
pub trait TokenCounter: Send + Sync {
    fn count(&self, model: &str, text: &str) -> usize;
}

/// Character-based token estimate
///
/// Counts Unicode scalar values and rounds up, so any non-empty text costs at
/// least one token. The model name is ignored.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenCounter {
    chars_per_token: usize,
}

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self::with_chars_per_token(DEFAULT_CHARS_PER_TOKEN)
    }

    /// A ratio of 0 is treated as 1
    pub fn with_chars_per_token(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, _model: &str, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// Model-exact counter backed by tiktoken BPE tables
///
/// The encoding is resolved from the model name (`gpt-4o*` uses o200k,
/// `gpt-4*` and `gpt-3.5*` use cl100k, ...). Models tiktoken does not know
/// are counted with the fallback estimate. Resolved encodings are cached per
/// model name, since building one is expensive.
pub struct TiktokenCounter {
    fallback: HeuristicTokenCounter,
    encodings: RwLock<HashMap<String, Option<Arc<CoreBPE>>>>,
}

impl TiktokenCounter {
    pub fn new() -> Self {
        Self::with_fallback(HeuristicTokenCounter::new())
    }

    pub fn with_fallback(fallback: HeuristicTokenCounter) -> Self {
        Self {
            fallback,
            encodings: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `model` is counted with a BPE table rather than the estimate
    pub fn is_exact_for(&self, model: &str) -> bool {
        self.encoding(model).is_some()
    }

    fn encoding(&self, model: &str) -> Option<Arc<CoreBPE>> {
        // A poisoned cache only holds fully built entries, so keep using it
        if let Some(cached) = self
            .encodings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(model)
        {
            return cached.clone();
        }

        let resolved = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                debug!(model, error = %e, "no BPE table for model, using estimate");
                None
            }
        };

        self.encodings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(model.to_string())
            .or_insert(resolved)
            .clone()
    }
}

impl Default for TiktokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, model: &str, text: &str) -> usize {
        match self.encoding(model) {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => self.fallback.count(model, text),
        }
    }
}
