//! Per-turn conversation context.
//!
//! Everything the model is told about "now" and about the hotel comes
//! from here: the server date, tomorrow's date, the live active room
//! list and the stored booking state. The transcript window keeps the
//! last `history_window` messages.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::NaiveDate;

use crate::booking::BookingState;
use crate::catalog::RoomCatalog;
use crate::chat::ChatMessage;
use crate::clock::Clock;
use crate::models::{Conversation, Message, Room};

/// Default number of transcript messages sent to the model.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub current_date: NaiveDate,
    pub tomorrow: NaiveDate,
    /// Active rooms, ordered by `sort_order`.
    pub rooms: Vec<Room>,
    pub booking: BookingState,
    /// The most recent transcript messages, oldest first.
    pub history: Vec<Message>,
    /// Formatted knowledge block; empty when retrieval found nothing.
    pub knowledge: String,
    history_window: usize,
}

impl ConversationContext {
    /// Append a message to the window, dropping the oldest past the limit.
    pub fn push_message(&mut self, message: Message) {
        self.history.push(message);
        trim_front(&mut self.history, self.history_window);
    }

    /// The transcript window as chat messages.
    pub fn history_messages(&self) -> Vec<ChatMessage> {
        self.history.iter().map(ChatMessage::from).collect()
    }
}

pub struct ContextBuilder {
    catalog: Arc<dyn RoomCatalog>,
    clock: Arc<dyn Clock>,
    history_window: usize,
}

impl ContextBuilder {
    pub fn new(catalog: Arc<dyn RoomCatalog>, clock: Arc<dyn Clock>, history_window: usize) -> Self {
        Self {
            catalog,
            clock,
            history_window: history_window.max(1),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub async fn build(&self, conversation: &Conversation) -> Result<ConversationContext> {
        let rooms = self
            .catalog
            .active_rooms()
            .await
            .context("Failed to load active rooms")?;

        let mut history = conversation.messages.clone();
        trim_front(&mut history, self.history_window);

        Ok(ConversationContext {
            conversation_id: conversation.id.clone(),
            current_date: self.clock.today(),
            tomorrow: self.clock.tomorrow(),
            rooms,
            booking: conversation.booking.clone(),
            history,
            knowledge: String::new(),
            history_window: self.history_window,
        })
    }
}

fn trim_front<T>(items: &mut Vec<T>, keep: usize) {
    if items.len() > keep {
        items.drain(..items.len() - keep);
    }
}
