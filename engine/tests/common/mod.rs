//! Shared fakes for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use chatstream_engine::chat::{ConversationConfig, ConversationContext, Message, Role};
use chatstream_engine::db::ChatStore;
use chatstream_engine::llm::tokens::TokenCounter;
use chatstream_engine::llm::{ChunkStream, CompletionChunk, LLMError, ModelClient};
use sdk::errors::{EngineError, Result};
use sdk::types::TurnConfigInput;

/// Counts whitespace-separated words, so tests can reason in whole tokens
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, _model: &str, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// How a scripted completion ends
#[derive(Clone)]
pub enum Ending {
    /// Stream ends after the last chunk
    Complete,
    /// Stream yields this error after the last chunk
    Fail(String),
    /// Stream never ends after the last chunk
    Hang,
}

/// Model client that replays fixed chunks and records what it was sent
pub struct ScriptedModel {
    chunks: Vec<String>,
    ending: Ending,
    open_error: Option<String>,
    calls: Mutex<Vec<Vec<(Role, String)>>>,
    produced: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ending: Ending::Complete,
            open_error: None,
            calls: Mutex::new(Vec::new()),
            produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    /// Fail when the stream is opened
    pub fn unavailable(reason: &str) -> Self {
        let mut model = Self::new(&[]);
        model.open_error = Some(reason.to_string());
        model
    }

    /// Messages sent on each call, oldest call first
    pub fn calls(&self) -> Vec<Vec<(Role, String)>> {
        self.calls.lock().unwrap().clone()
    }

    /// Chunks pulled from the stream so far
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        messages: &[Message],
        _config: &ConversationConfig,
    ) -> std::result::Result<ChunkStream, LLMError> {
        self.calls.lock().unwrap().push(
            messages
                .iter()
                .map(|m| (m.role(), m.content().to_string()))
                .collect(),
        );

        if let Some(reason) = &self.open_error {
            return Err(LLMError::ProviderUnavailable(reason.clone()));
        }

        let produced = self.produced.clone();
        let chunks = stream::iter(self.chunks.clone()).map(move |delta| {
            produced.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionChunk::new(delta))
        });

        let stream: ChunkStream = match &self.ending {
            Ending::Complete => chunks.boxed(),
            Ending::Fail(reason) => chunks
                .chain(stream::once({
                    let reason = reason.clone();
                    async move { Err(LLMError::NetworkError(reason)) }
                }))
                .boxed(),
            Ending::Hang => chunks.chain(stream::pending()).boxed(),
        };

        Ok(stream)
    }
}

/// Store whose every call fails
pub struct BrokenStore;

#[async_trait]
impl ChatStore for BrokenStore {
    async fn create_chat(&self, _chat: &ConversationContext) -> Result<()> {
        Err(EngineError::Store("disk on fire".to_string()))
    }

    async fn find_chat_by_id(&self, _id: &str) -> Result<ConversationContext> {
        Err(EngineError::Store("disk on fire".to_string()))
    }

    async fn save_chat(&self, _chat: &ConversationContext) -> Result<()> {
        Err(EngineError::Store("disk on fire".to_string()))
    }
}

/// In-memory store whose saves signal when they start and then take a while
pub struct SlowSaveStore {
    pub inner: chatstream_engine::db::InMemoryChatStore,
    pub save_started: Notify,
    delay: Duration,
}

impl SlowSaveStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: chatstream_engine::db::InMemoryChatStore::new(),
            save_started: Notify::new(),
            delay,
        }
    }
}

#[async_trait]
impl ChatStore for SlowSaveStore {
    async fn create_chat(&self, chat: &ConversationContext) -> Result<()> {
        self.inner.create_chat(chat).await
    }

    async fn find_chat_by_id(&self, id: &str) -> Result<ConversationContext> {
        self.inner.find_chat_by_id(id).await
    }

    async fn save_chat(&self, chat: &ConversationContext) -> Result<()> {
        self.save_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.save_chat(chat).await
    }
}

pub fn turn_config(capacity: usize) -> TurnConfigInput {
    TurnConfigInput::new("gpt-4o-mini", capacity, "You are helpful")
}
