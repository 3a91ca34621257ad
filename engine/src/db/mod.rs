//! Database module for conversation persistence
//!
//! This module provides the [`ChatStore`] capability the orchestrator reads
//! and writes conversations through, a SQLite implementation backed by sqlx
//! in WAL mode, and an in-process implementation for tests and ephemeral
//! sessions.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::chat::ConversationContext;

pub mod chats;
pub mod memory;

// Re-export commonly used types
pub use chats::SqliteChatStore;
pub use memory::InMemoryChatStore;

/// Persistence capability for conversations
///
/// Stores do not serialize concurrent turns on the same conversation:
/// `save_chat` is a full overwrite, so callers must not run two turns on
/// one chat id at the same time.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a brand-new conversation with its initial messages
    async fn create_chat(&self, chat: &ConversationContext) -> sdk::Result<()>;

    /// Load a conversation
    ///
    /// Returns `EngineError::NotFound` when no conversation has this id.
    async fn find_chat_by_id(&self, id: &str) -> sdk::Result<ConversationContext>;

    /// Overwrite config, status, token usage and both message logs
    ///
    /// Returns `EngineError::NotFound` when the conversation was never created.
    async fn save_chat(&self, chat: &ConversationContext) -> sdk::Result<()>;
}

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    ///
    /// This will:
    /// 1. Create the database file and its directory if they don't exist
    /// 2. Enable WAL mode for better concurrency
    /// 3. Run migrations to set up the schema
    ///
    /// SQLite replays a leftover WAL on its own when the file is reopened
    /// after an unclean shutdown. Call `close()` on graceful shutdown to
    /// checkpoint it.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        // Configure SQLite connection with WAL mode
        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };

        // Run migrations
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    ///
    /// Every statement is `IF NOT EXISTS`, so this is safe on each start.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush the WAL to disk
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Close the database connection
    ///
    /// This flushes the WAL and closes all connections in the pool.
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        info!("Database connection closed");
        Ok(())
    }

    /// Create a chat store over this pool
    pub fn chats(&self) -> SqliteChatStore {
        SqliteChatStore::new(self.pool.clone())
    }
}
