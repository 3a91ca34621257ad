//! In-process chat store
//!
//! Keeps conversations in a map guarded by a tokio `RwLock`. Used by tests
//! and by sessions that do not need durable history.

use async_trait::async_trait;
use sdk::errors::{EngineError, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::ChatStore;
use crate::chat::ConversationContext;

/// Map-backed chat store
#[derive(Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<String, ConversationContext>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations
    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chats.read().await.is_empty()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_chat(&self, chat: &ConversationContext) -> Result<()> {
        let mut chats = self.chats.write().await;
        if chats.contains_key(chat.id()) {
            return Err(EngineError::Store(format!(
                "Chat {} already exists",
                chat.id()
            )));
        }
        chats.insert(chat.id().to_string(), chat.clone());
        Ok(())
    }

    async fn find_chat_by_id(&self, id: &str) -> Result<ConversationContext> {
        self.chats
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::chat_not_found(id))
    }

    async fn save_chat(&self, chat: &ConversationContext) -> Result<()> {
        let mut chats = self.chats.write().await;
        match chats.get_mut(chat.id()) {
            Some(stored) => {
                *stored = chat.clone();
                Ok(())
            }
            None => Err(EngineError::chat_not_found(chat.id())),
        }
    }
}
