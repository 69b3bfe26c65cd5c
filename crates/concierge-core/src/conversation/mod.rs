//! Conversation persistence contract.
//!
//! The dialogue layer needs only a narrow slice of storage: look up a
//! session, append a message, and rewrite the booking state. The booking
//! state lives in a schemaless JSON metadata blob on the conversation;
//! [`booking_state_from_metadata`] and [`store_booking_state`] are the
//! single (de)serialization boundary for it.

pub mod memory;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::booking::BookingState;
use crate::models::{Conversation, Message};

/// Metadata key holding the serialized [`BookingState`].
pub const BOOKING_STATE_KEY: &str = "bookingState";

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// A conversation with its full transcript, oldest message first.
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>>;

    /// Create an empty conversation in the `idle` booking step.
    async fn create(&self, session_id: &str) -> Result<Conversation>;

    /// Append a message and bump `message_count`, atomically.
    async fn add_message(&self, conversation_id: &str, message: &Message) -> Result<()>;

    /// Replace the stored booking state, keeping other metadata keys.
    async fn update_booking_state(&self, conversation_id: &str, state: &BookingState) -> Result<()>;

    /// Set `has_reservation`.
    async fn mark_reservation(&self, conversation_id: &str) -> Result<()>;

    async fn find_or_create(&self, session_id: &str) -> Result<Conversation> {
        match self.find_by_session(session_id).await? {
            Some(conversation) => Ok(conversation),
            None => self.create(session_id).await,
        }
    }
}

/// Read the booking state out of a metadata blob.
///
/// A missing or unreadable state yields the default (`idle`) state.
pub fn booking_state_from_metadata(metadata: &Value) -> BookingState {
    match metadata.get(BOOKING_STATE_KEY) {
        None | Some(Value::Null) => BookingState::default(),
        Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "unreadable booking state in conversation metadata, resetting to idle");
            BookingState::default()
        }),
    }
}

/// Write `state` into a metadata blob, keeping its other keys.
pub fn store_booking_state(metadata: &mut Value, state: &BookingState) -> Result<()> {
    let encoded = serde_json::to_value(state).context("Failed to serialize booking state")?;
    if !metadata.is_object() {
        *metadata = Value::Object(Default::default());
    }
    if let Value::Object(map) = metadata {
        map.insert(BOOKING_STATE_KEY.to_string(), encoded);
    }
    Ok(())
}
