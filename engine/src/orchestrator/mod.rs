//! Completion Orchestrator
//!
//! Runs one request/response turn of a conversation:
//!
//! 1. Resolve the conversation, creating it when the chat id is unknown
//! 2. Append the user message
//! 3. Stream the model's completion, publishing cumulative snapshots
//! 4. Append the assistant message
//! 5. Persist the conversation
//!
//! # Failure policy
//!
//! Apart from creating a new conversation in step 1, the store is written
//! only at step 5. A turn that fails or is cancelled earlier leaves the
//! conversation's messages exactly as they were before the turn, even though
//! the consumer may already have seen part of the streamed answer. Once step 5
//! has started it is not cancelled.
//!
//! # Concurrency
//!
//! Persisting is a full overwrite, so two turns must never run at the same
//! time on one chat id. Serializing turns per conversation is the caller's
//! responsibility.

use futures::StreamExt;
use sdk::errors::{EngineError, Result};
use sdk::types::{TurnInput, TurnOutput};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{ConversationConfig, ConversationContext, Message, Role};
use crate::db::ChatStore;
use crate::llm::tokens::TokenCounter;
use crate::llm::ModelClient;

/// Default capacity of the per-turn output channel
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Stage of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Resolving,
    AppendingUser,
    Streaming,
    AppendingAssistant,
    Persisting,
    Done,
    Failed,
}

impl TurnState {
    /// Whether a turn in this state may move to `next`
    ///
    /// Stages advance strictly in order. `Failed` is reachable from every
    /// non-terminal stage; `Done` and `Failed` are terminal.
    pub fn can_advance_to(self, next: TurnState) -> bool {
        use TurnState::*;

        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Resolving, AppendingUser)
            | (AppendingUser, Streaming)
            | (Streaming, AppendingAssistant)
            | (AppendingAssistant, Persisting)
            | (Persisting, Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed)
    }
}

/// Tracks the stage of a single turn for logging
struct TurnProgress {
    chat_id: String,
    state: TurnState,
}

impl TurnProgress {
    fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            state: TurnState::Resolving,
        }
    }

    fn advance(&mut self, next: TurnState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal turn transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(chat_id = %self.chat_id, from = ?self.state, to = ?next, "turn state");
        self.state = next;
    }
}

/// Race `fut` against the turn's cancellation token
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Runs conversation turns against a chat store and a model client
pub struct CompletionOrchestrator {
    store: Arc<dyn ChatStore>,
    model_client: Arc<dyn ModelClient>,
    token_counter: Arc<dyn TokenCounter>,
    stream_buffer: usize,
}

impl CompletionOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        store: Arc<dyn ChatStore>,
        model_client: Arc<dyn ModelClient>,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            store,
            model_client,
            token_counter,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Set the capacity of the output channel created by [`Self::start`]
    ///
    /// A capacity of 0 is treated as 1.
    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }

    pub fn stream_buffer(&self) -> usize {
        self.stream_buffer
    }

    /// Run one turn, publishing cumulative snapshots on `sink`
    ///
    /// A full `sink` blocks the turn, which in turn stops reading from the
    /// model. If the receiver is dropped the turn still completes and
    /// persists; snapshots are no longer delivered.
    ///
    /// # Errors
    ///
    /// - `EngineError::Validation` for bad input, including a missing config
    ///   when the conversation has to be created, or an empty completion
    /// - `EngineError::IllegalState` if the conversation has ended
    /// - `EngineError::OverCapacity` if a message alone exceeds the context window
    /// - `EngineError::Store` / `EngineError::ModelClient` for upstream failures
    /// - `EngineError::Cancelled` if `cancel` fires before persisting starts;
    ///   a save already in progress is not interrupted
    pub async fn execute(
        &self,
        input: TurnInput,
        sink: mpsc::Sender<TurnOutput>,
        cancel: CancellationToken,
    ) -> Result<TurnOutput> {
        let mut progress = TurnProgress::new(&input.chat_id);

        let result = self.run_turn(&input, &sink, &cancel, &mut progress).await;

        match &result {
            Ok(output) => {
                progress.advance(TurnState::Done);
                info!(
                    chat_id = %output.chat_id,
                    user_id = %output.user_id,
                    chars = output.content.chars().count(),
                    "turn completed"
                );
            }
            Err(e) => {
                let failed_in = progress.state;
                progress.advance(TurnState::Failed);
                warn!(
                    chat_id = %progress.chat_id,
                    user_id = %input.user_id,
                    state = ?failed_in,
                    error = %e,
                    "turn failed"
                );
            }
        }

        result
    }

    /// Run one turn on a background task with a fresh output channel
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: Arc<Self>, input: TurnInput, cancel: CancellationToken) -> TurnHandle {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let task = tokio::spawn(async move { self.execute(input, tx, cancel).await });

        TurnHandle {
            outputs: Some(rx),
            task,
        }
    }

    async fn run_turn(
        &self,
        input: &TurnInput,
        sink: &mpsc::Sender<TurnOutput>,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> Result<TurnOutput> {
        if input.user_id.trim().is_empty() {
            return Err(EngineError::Validation("User id is empty".to_string()));
        }

        // Resolving
        let mut chat = self.resolve_chat(input, cancel).await?;
        progress.chat_id = chat.id().to_string();
        progress.advance(TurnState::AppendingUser);

        // Appending(user)
        let config = chat.config().clone();
        let user_message = Message::new(
            Role::User,
            input.user_message.as_str(),
            &config.model,
            self.token_counter.as_ref(),
        )?;
        chat.add_message(user_message)?;
        progress.advance(TurnState::Streaming);

        // Streaming
        let content = self
            .stream_completion(&chat, &input.user_id, &config, sink, cancel)
            .await?;
        progress.advance(TurnState::AppendingAssistant);

        // Appending(assistant)
        let assistant_message = Message::new(
            Role::Assistant,
            content.as_str(),
            &config.model,
            self.token_counter.as_ref(),
        )?;
        chat.add_message(assistant_message)?;
        // Last cancellation point; a started save is never interrupted
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        progress.advance(TurnState::Persisting);

        // Persisting
        self.store.save_chat(&chat).await?;

        debug!(
            chat_id = %chat.id(),
            token_usage = chat.token_usage(),
            active = chat.active_count(),
            evicted = chat.evicted_messages().len(),
            "chat persisted"
        );

        Ok(TurnOutput::new(chat.id(), input.user_id.as_str(), content))
    }

    async fn resolve_chat(
        &self,
        input: &TurnInput,
        cancel: &CancellationToken,
    ) -> Result<ConversationContext> {
        if !input.chat_id.is_empty() {
            match cancellable(cancel, self.store.find_chat_by_id(&input.chat_id)).await? {
                Ok(chat) => {
                    debug!(chat_id = %chat.id(), "resuming chat");
                    return Ok(chat);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let chat = self.new_chat(input)?;
        cancellable(cancel, self.store.create_chat(&chat)).await??;

        info!(chat_id = %chat.id(), user_id = %chat.user_id(), "chat created");
        Ok(chat)
    }

    fn new_chat(&self, input: &TurnInput) -> Result<ConversationContext> {
        let config_input = input.config.as_ref().ok_or_else(|| {
            EngineError::Validation(format!(
                "Chat '{}' does not exist and no config was provided to create it",
                input.chat_id
            ))
        })?;

        let config = ConversationConfig::from_input(config_input)?;
        let system_message = Message::new(
            Role::System,
            config_input.initial_system_message.as_str(),
            &config.model,
            self.token_counter.as_ref(),
        )?;

        let chat_id = if input.chat_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            input.chat_id.clone()
        };

        ConversationContext::with_id(chat_id, input.user_id.as_str(), system_message, config)
    }

    async fn stream_completion(
        &self,
        chat: &ConversationContext,
        user_id: &str,
        config: &ConversationConfig,
        sink: &mpsc::Sender<TurnOutput>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut chunks = cancellable(
            cancel,
            self.model_client
                .stream_completion(chat.active_messages(), config),
        )
        .await??;

        let mut content = String::new();
        let mut chunk_count = 0usize;
        let mut delivering = true;

        while let Some(chunk) = cancellable(cancel, chunks.next()).await? {
            let chunk = chunk?;
            if chunk.delta.is_empty() {
                continue;
            }
            chunk_count += 1;
            content.push_str(&chunk.delta);

            if delivering {
                let snapshot = TurnOutput::new(chat.id(), user_id, content.as_str());
                if cancellable(cancel, sink.send(snapshot)).await?.is_err() {
                    debug!(chat_id = %chat.id(), "output receiver dropped, continuing turn");
                    delivering = false;
                }
            }
        }

        debug!(
            chat_id = %chat.id(),
            model = self.model_client.name(),
            chunks = chunk_count,
            "completion stream finished"
        );

        Ok(content)
    }
}

/// A turn running on a background task
pub struct TurnHandle {
    outputs: Option<mpsc::Receiver<TurnOutput>>,
    task: JoinHandle<Result<TurnOutput>>,
}

impl TurnHandle {
    /// Next cumulative snapshot, or `None` once the turn stopped publishing
    pub async fn recv(&mut self) -> Option<TurnOutput> {
        match self.outputs.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Stop receiving snapshots and wait for the turn's result
    pub async fn finish(mut self) -> Result<TurnOutput> {
        self.outputs = None;
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(EngineError::Cancelled),
            Err(e) => Err(EngineError::IllegalState(format!("Turn task panicked: {}", e))),
        }
    }
}
