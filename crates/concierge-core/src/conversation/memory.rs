//! In-memory [`ConversationRepository`].
//!
//! Keeps the booking state inside a JSON metadata blob, the same way the
//! SQLite repository does, so tests exercise the real serialization path.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::booking::BookingState;
use crate::models::{Conversation, Message};

use super::{booking_state_from_metadata, store_booking_state, ConversationRepository};

struct Row {
    conversation: Conversation,
    metadata: Value,
}

#[derive(Default)]
pub struct InMemoryConversations {
    rows: RwLock<HashMap<String, Row>>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory conversation lock poisoned")
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversations {
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .values()
            .find(|row| row.conversation.session_id == session_id)
            .map(|row| Conversation {
                booking: booking_state_from_metadata(&row.metadata),
                ..row.conversation.clone()
            }))
    }

    async fn create(&self, session_id: &str) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            has_reservation: false,
            message_count: 0,
            booking: BookingState::default(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let mut metadata = serde_json::json!({});
        store_booking_state(&mut metadata, &conversation.booking)?;
        self.rows.write().map_err(poisoned)?.insert(
            conversation.id.clone(),
            Row {
                conversation: conversation.clone(),
                metadata,
            },
        );
        Ok(conversation)
    }

    async fn add_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        let Some(row) = rows.get_mut(conversation_id) else {
            bail!("conversation not found: {}", conversation_id);
        };
        row.conversation.messages.push(message.clone());
        row.conversation.message_count += 1;
        row.conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn update_booking_state(&self, conversation_id: &str, state: &BookingState) -> Result<()> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        let Some(row) = rows.get_mut(conversation_id) else {
            bail!("conversation not found: {}", conversation_id);
        };
        store_booking_state(&mut row.metadata, state)?;
        row.conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_reservation(&self, conversation_id: &str) -> Result<()> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        let Some(row) = rows.get_mut(conversation_id) else {
            bail!("conversation not found: {}", conversation_id);
        };
        row.conversation.has_reservation = true;
        Ok(())
    }
}
