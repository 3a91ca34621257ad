//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat: Run one turn and stream the answer
//! - show: Print a conversation
//! - end: End a conversation

use anyhow::{Context, Result};
use sdk::errors::ChatErrorExt;
use sdk::types::{TurnInput, TurnOutput};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::chat::{ConversationContext, Message};
use crate::config::Config;
use crate::db::{ChatStore, Database};
use crate::llm::openai::OpenAIProvider;
use crate::llm::tokens::TiktokenCounter;
use crate::orchestrator::CompletionOrchestrator;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Renders cumulative snapshots for a terminal
///
/// Text output prints only the suffix not yet shown; JSON output prints each
/// snapshot as one line.
pub struct SnapshotPrinter {
    format: OutputFormat,
    shown: String,
}

impl SnapshotPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            shown: String::new(),
        }
    }

    /// Text to write for `snapshot`
    pub fn render(&mut self, snapshot: &TurnOutput) -> Result<String> {
        let rendered = match self.format {
            OutputFormat::Text => snapshot.delta_since(&self.shown).to_string(),
            OutputFormat::Json => format!("{}\n", serde_json::to_string(snapshot)?),
        };
        self.shown = snapshot.content.clone();
        Ok(rendered)
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

/// Surface the user hint next to the error
fn with_hint(e: sdk::EngineError) -> anyhow::Error {
    let hint = e.user_hint().to_string();
    anyhow::Error::new(e).context(hint)
}

/// Send a message and stream the answer
///
/// A new conversation is created from the `[chat]` config section when
/// `chat_id` is omitted or unknown. Ctrl-C cancels the turn; nothing is
/// persisted for a cancelled turn.
pub async fn handle_chat(
    user: String,
    chat_id: Option<String>,
    message: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;

    let api_key = config.api_key();
    if api_key.is_none() {
        tracing::warn!(
            env = %config.llm.api_key_env,
            "No API key set, sending unauthenticated requests"
        );
    }
    let provider = OpenAIProvider::new(
        config.llm.base_url.clone(),
        api_key,
        config.request_timeout(),
    )
    .context("Failed to create model client")?;

    let orchestrator = Arc::new(
        CompletionOrchestrator::new(
            Arc::new(database.chats()),
            Arc::new(provider),
            Arc::new(TiktokenCounter::new()),
        )
        .with_stream_buffer(config.stream.buffer_size),
    );

    let input = TurnInput::new(chat_id.unwrap_or_default(), user, message)
        .with_config(config.chat.to_turn_config());

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling turn");
                cancel.cancel();
            }
        })
    };

    let mut handle = orchestrator.start(input, cancel);
    let mut printer = SnapshotPrinter::new(format);
    let mut stdout = std::io::stdout();

    while let Some(snapshot) = handle.recv().await {
        stdout.write_all(printer.render(&snapshot)?.as_bytes())?;
        stdout.flush()?;
    }

    let result = handle.finish().await;
    ctrl_c.abort();
    database.close().await?;

    let output = result.map_err(with_hint)?;
    match format {
        OutputFormat::Text => {
            println!();
            eprintln!("[chat {}]", output.chat_id);
        }
        OutputFormat::Json => {
            let done = json!({
                "chat_id": output.chat_id,
                "user_id": output.user_id,
                "content": output.content,
                "done": true,
            });
            println!("{}", serde_json::to_string(&done)?);
        }
    }

    Ok(())
}

fn print_messages(title: &str, messages: &[Message]) {
    println!("{} ({}):", title, messages.len());
    for message in messages {
        println!(
            "  [{}] {} ({} tokens, {})",
            message.role(),
            message.content(),
            message.tokens(),
            message.created_at().format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn chat_summary(chat: &ConversationContext) -> serde_json::Value {
    json!({
        "id": chat.id(),
        "user_id": chat.user_id(),
        "status": chat.status(),
        "model": chat.config().model.name(),
        "capacity": chat.config().model.max_tokens(),
        "token_usage": chat.token_usage(),
        "config": chat.config(),
        "active": chat.active_messages(),
        "evicted": chat.evicted_messages(),
    })
}

/// Print a conversation's status and messages
pub async fn handle_show(chat_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let store = database.chats();

    let chat = store.find_chat_by_id(&chat_id).await.map_err(with_hint)?;

    match format {
        OutputFormat::Text => {
            println!("Chat ID: {}", chat.id());
            println!("  User: {}", chat.user_id());
            println!("  Status: {}", chat.status());
            println!(
                "  Model: {} ({} / {} tokens used)",
                chat.config().model.name(),
                chat.token_usage(),
                chat.config().model.max_tokens()
            );
            println!();
            print_messages("Active messages", chat.active_messages());
            if !chat.evicted_messages().is_empty() {
                println!();
                print_messages("Evicted messages", chat.evicted_messages());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&chat_summary(&chat))?);
        }
    }

    database.close().await?;
    Ok(())
}

/// End a conversation and save it
pub async fn handle_end(chat_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let store = database.chats();

    let mut chat = store.find_chat_by_id(&chat_id).await.map_err(with_hint)?;
    let was_ended = chat.is_ended();
    chat.end();
    store.save_chat(&chat).await.map_err(with_hint)?;

    tracing::info!(chat_id = %chat.id(), "chat ended");

    match format {
        OutputFormat::Text => {
            if was_ended {
                println!("Chat {} was already ended", chat.id());
            } else {
                println!("Chat {} ended", chat.id());
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "id": chat.id(),
                "status": chat.status(),
                "already_ended": was_ended,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await?;
    Ok(())
}
