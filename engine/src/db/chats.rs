//! Conversation persistence operations
//!
//! A conversation is one row in `chats` plus its messages in
//! `chat_messages`. Active messages are tagged `erased = 0` and evicted ones
//! `erased = 1`, each log ordered by `order_msg`. All queries are
//! parameterized.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sdk::errors::{EngineError, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use super::ChatStore;
use crate::chat::{
    ChatStatus, ConversationConfig, ConversationContext, ConversationParts, Message, Model,
};

/// SQLite-backed chat store
#[derive(Clone)]
pub struct SqliteChatStore {
    pool: SqlitePool,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Store(format!("{}: {}", context, e))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| store_err("Invalid stored timestamp", e))
}

impl SqliteChatStore {
    /// Create a new chat store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_messages(
        tx: &mut Transaction<'_, Sqlite>,
        chat_id: &str,
        messages: &[Message],
        erased: bool,
    ) -> Result<()> {
        for (order, message) in messages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chat_messages
                    (id, chat_id, role, content, tokens, model, erased, order_msg, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(message.id())
            .bind(chat_id)
            .bind(message.role().as_str())
            .bind(message.content())
            .bind(message.tokens() as i64)
            .bind(message.model())
            .bind(erased)
            .bind(order as i64)
            .bind(format_timestamp(message.created_at()))
            .execute(&mut **tx)
            .await
            .map_err(|e| store_err("Failed to insert chat message", e))?;
        }

        Ok(())
    }

    async fn load_messages(
        tx: &mut Transaction<'_, Sqlite>,
        chat_id: &str,
        erased: bool,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, role, content, tokens, model, created_at
            FROM chat_messages
            WHERE chat_id = ? AND erased = ?
            ORDER BY order_msg ASC
            "#,
        )
        .bind(chat_id)
        .bind(erased)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| store_err("Failed to fetch chat messages", e))?;

        rows.iter()
            .map(|row| message_from_row(row).map_err(|e| corrupt(chat_id, e)))
            .collect()
    }
}

/// Stored data that fails domain validation is a storage fault
fn corrupt(chat_id: &str, e: EngineError) -> EngineError {
    match e {
        EngineError::Store(_) => e,
        other => EngineError::Store(format!("Chat {} is corrupt: {}", chat_id, other)),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let get_str = |column: &str| -> Result<String> {
        row.try_get::<String, _>(column)
            .map_err(|e| store_err("Invalid chat message row", e))
    };

    let tokens: i64 = row
        .try_get("tokens")
        .map_err(|e| store_err("Invalid chat message row", e))?;

    Message::restore(
        get_str("id")?,
        get_str("role")?.parse()?,
        get_str("content")?,
        usize::try_from(tokens).map_err(|e| store_err("Invalid token count", e))?,
        get_str("model")?,
        parse_timestamp(&get_str("created_at")?)?,
    )
}

fn config_from_row(row: &SqliteRow) -> std::result::Result<ConversationConfig, sqlx::Error> {
    let model_max_tokens: i64 = row.try_get("model_max_tokens")?;
    let stop_json: String = row.try_get("stop")?;
    let n: i64 = row.try_get("n")?;
    let max_tokens: i64 = row.try_get("max_tokens")?;

    let decode = |e: &dyn std::fmt::Display| sqlx::Error::Decode(e.to_string().into());

    let model = Model::new(
        row.try_get::<String, _>("model")?,
        usize::try_from(model_max_tokens).map_err(|e| decode(&e))?,
    )
    .map_err(|e| decode(&e))?;

    Ok(ConversationConfig {
        model,
        temperature: row.try_get::<f64, _>("temperature")? as f32,
        top_p: row.try_get::<f64, _>("top_p")? as f32,
        n: u32::try_from(n).map_err(|e| decode(&e))?,
        stop: serde_json::from_str(&stop_json).map_err(|e| decode(&e))?,
        max_tokens: u32::try_from(max_tokens).map_err(|e| decode(&e))?,
        presence_penalty: row.try_get::<f64, _>("presence_penalty")? as f32,
        frequency_penalty: row.try_get::<f64, _>("frequency_penalty")? as f32,
    })
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn create_chat(&self, chat: &ConversationContext) -> Result<()> {
        let config = chat.config();
        let stop = serde_json::to_string(&config.stop)
            .map_err(|e| store_err("Failed to encode stop sequences", e))?;
        let now = format_timestamp(Utc::now());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO chats
                (id, user_id, initial_message_id, status, token_usage, model, model_max_tokens,
                 temperature, top_p, n, stop, max_tokens, presence_penalty, frequency_penalty,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chat.id())
        .bind(chat.user_id())
        .bind(chat.initial_system_message().id())
        .bind(chat.status().as_str())
        .bind(chat.token_usage() as i64)
        .bind(config.model.name())
        .bind(config.model.max_tokens() as i64)
        .bind(config.temperature as f64)
        .bind(config.top_p as f64)
        .bind(config.n as i64)
        .bind(&stop)
        .bind(config.max_tokens as i64)
        .bind(config.presence_penalty as f64)
        .bind(config.frequency_penalty as f64)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_err("Failed to create chat", e))?;

        Self::insert_messages(&mut tx, chat.id(), chat.active_messages(), false).await?;
        Self::insert_messages(&mut tx, chat.id(), chat.evicted_messages(), true).await?;

        tx.commit()
            .await
            .map_err(|e| store_err("Failed to commit chat", e))?;

        debug!(chat_id = %chat.id(), "chat created");
        Ok(())
    }

    async fn find_chat_by_id(&self, id: &str) -> Result<ConversationContext> {
        // One transaction so a concurrent save is seen entirely or not at all
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("Failed to begin transaction", e))?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, initial_message_id, status, token_usage, model, model_max_tokens,
                   temperature, top_p, n, stop, max_tokens, presence_penalty, frequency_penalty
            FROM chats
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| store_err("Failed to fetch chat", e))?
        .ok_or_else(|| EngineError::chat_not_found(id))?;

        let active = Self::load_messages(&mut tx, id, false).await?;
        let evicted = Self::load_messages(&mut tx, id, true).await?;

        tx.commit()
            .await
            .map_err(|e| store_err("Failed to finish read transaction", e))?;

        let config = config_from_row(&row).map_err(|e| store_err("Invalid chat row", e))?;
        let get_str = |column: &str| -> Result<String> {
            row.try_get::<String, _>(column)
                .map_err(|e| store_err("Invalid chat row", e))
        };
        let stored_token_usage: i64 = row
            .try_get("token_usage")
            .map_err(|e| store_err("Invalid chat row", e))?;

        let initial_message_id = get_str("initial_message_id")?;
        let initial_system_message = active
            .iter()
            .chain(evicted.iter())
            .find(|message| message.id() == initial_message_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::Store(format!(
                    "Initial message {} of chat {} is missing",
                    initial_message_id, id
                ))
            })?;

        let status = get_str("status")?
            .parse::<ChatStatus>()
            .map_err(|e| corrupt(id, e))?;

        ConversationContext::from_parts(ConversationParts {
            id: get_str("id")?,
            user_id: get_str("user_id")?,
            initial_system_message,
            active,
            evicted,
            status,
            stored_token_usage: usize::try_from(stored_token_usage).ok(),
            config,
        })
        .map_err(|e| corrupt(id, e))
    }

    async fn save_chat(&self, chat: &ConversationContext) -> Result<()> {
        let config = chat.config();
        let stop = serde_json::to_string(&config.stop)
            .map_err(|e| store_err("Failed to encode stop sequences", e))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("Failed to begin transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE chats
            SET user_id = ?, status = ?, token_usage = ?, model = ?, model_max_tokens = ?,
                temperature = ?, top_p = ?, n = ?, stop = ?, max_tokens = ?,
                presence_penalty = ?, frequency_penalty = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(chat.user_id())
        .bind(chat.status().as_str())
        .bind(chat.token_usage() as i64)
        .bind(config.model.name())
        .bind(config.model.max_tokens() as i64)
        .bind(config.temperature as f64)
        .bind(config.top_p as f64)
        .bind(config.n as i64)
        .bind(&stop)
        .bind(config.max_tokens as i64)
        .bind(config.presence_penalty as f64)
        .bind(config.frequency_penalty as f64)
        .bind(format_timestamp(Utc::now()))
        .bind(chat.id())
        .execute(&mut *tx)
        .await
        .map_err(|e| store_err("Failed to update chat", e))?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Err(EngineError::chat_not_found(chat.id()));
        }

        sqlx::query("DELETE FROM chat_messages WHERE chat_id = ?")
            .bind(chat.id())
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("Failed to delete chat messages", e))?;

        Self::insert_messages(&mut tx, chat.id(), chat.active_messages(), false).await?;
        Self::insert_messages(&mut tx, chat.id(), chat.evicted_messages(), true).await?;

        tx.commit()
            .await
            .map_err(|e| store_err("Failed to commit chat", e))?;

        debug!(
            chat_id = %chat.id(),
            active = chat.active_count(),
            evicted = chat.evicted_messages().len(),
            "chat saved"
        );
        Ok(())
    }
}
