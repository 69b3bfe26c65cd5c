//! Core data models shared by the store, catalog and dialogue layers.
//!
//! - [`Document`] / [`NewChunk`] / [`StoredChunk`]: the knowledge base.
//! - [`Room`] / [`Reservation`]: the booking catalog.
//! - [`Conversation`] / [`Message`]: the per-session transcript.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::booking::BookingState;

/// A knowledge-base source (uploaded file or crawled page).
///
/// `content_hash` is the SHA-256 of the full text and acts as the
/// dedup key during ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub name: String,
    /// `"md"`, `"txt"`, `"crawl"`, …
    pub doc_type: String,
    pub source_url: Option<String>,
    pub content_hash: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    /// Unix timestamp (seconds).
    pub updated_at: i64,
}

/// A chunk ready to be written to the vector store.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: String,
    /// Position within the parent document, starting at 0.
    pub chunk_index: i64,
    pub content: String,
    pub context_before: Option<String>,
    pub context_after: Option<String>,
    /// Human-readable source label shown in the prompt (file name or URL).
    pub source_name: String,
    pub embedding: Vec<f32>,
}

/// A chunk as read back from the vector store (without its vector).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub context_before: Option<String>,
    pub context_after: Option<String>,
    pub source_name: String,
}

/// A search hit: a chunk plus its cosine similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f32,
}

/// A bookable room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub capacity: u32,
    pub price_per_night_cents: i64,
    pub image_url: String,
    pub features: Vec<String>,
    pub is_active: bool,
    pub sort_order: i32,
}

impl Room {
    /// Nightly price in euros.
    pub fn price_per_night(&self) -> f64 {
        cents_to_euros(self.price_per_night_cents)
    }

    pub fn can_accommodate(&self, guests: u32) -> bool {
        guests <= self.capacity
    }
}

/// Converts an amount in cents to euros.
pub fn cents_to_euros(cents: i64) -> f64 {
    cents as f64 / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => anyhow::bail!("unknown reservation status: '{}'", other),
        }
    }
}

/// Input for [`RoomCatalog::create_reservation`](crate::catalog::RoomCatalog::create_reservation).
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub room_id: String,
    pub guest_name: String,
    pub guest_email: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests_count: u32,
    pub total_price_cents: i64,
    pub conversation_id: Option<String>,
}

impl NewReservation {
    /// Entity-level sanity checks, independent of the dialogue layer.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.check_in >= self.check_out {
            anyhow::bail!("check-out must be after check-in");
        }
        if self.guests_count < 1 {
            anyhow::bail!("at least one guest is required");
        }
        if !self.guest_email.contains('@') {
            anyhow::bail!("invalid guest email");
        }
        Ok(())
    }
}

/// A persisted reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: String,
    pub room_id: String,
    pub guest_name: String,
    pub guest_email: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests_count: u32,
    pub total_price_cents: i64,
    pub status: ReservationStatus,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => anyhow::bail!("unknown message role: '{}'", other),
        }
    }
}

/// One utterance in a conversation transcript. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Attached tool calls, retrieval sources, etc. `{}` when empty.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One guest's chat session.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub session_id: String,
    pub has_reservation: bool,
    pub message_count: i64,
    pub booking: BookingState,
    /// Transcript in creation order.
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(check_in: &str, check_out: &str, guests: u32, email: &str) -> NewReservation {
        NewReservation {
            room_id: "r1".to_string(),
            guest_name: "Anna".to_string(),
            guest_email: email.to_string(),
            check_in: check_in.parse().unwrap(),
            check_out: check_out.parse().unwrap(),
            guests_count: guests,
            total_price_cents: 36000,
            conversation_id: None,
        }
    }

    #[test]
    fn test_reservation_validate() {
        assert!(reservation("2024-06-10", "2024-06-12", 2, "a@b.it")
            .validate()
            .is_ok());
        assert!(reservation("2024-06-12", "2024-06-12", 2, "a@b.it")
            .validate()
            .is_err());
        assert!(reservation("2024-06-10", "2024-06-12", 0, "a@b.it")
            .validate()
            .is_err());
        assert!(reservation("2024-06-10", "2024-06-12", 2, "nope")
            .validate()
            .is_err());
    }

    #[test]
    fn test_status_roundtrip_text() {
        for s in ["pending", "confirmed", "cancelled"] {
            let status: ReservationStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("archived".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_room_price_in_euros() {
        let room = Room {
            id: "r1".into(),
            slug: "camera-limone".into(),
            name: "Camera Limone".into(),
            description: String::new(),
            capacity: 2,
            price_per_night_cents: 18050,
            image_url: String::new(),
            features: vec![],
            is_active: true,
            sort_order: 0,
        };
        assert!((room.price_per_night() - 180.5).abs() < 1e-9);
        assert!(room.can_accommodate(2));
        assert!(!room.can_accommodate(3));
    }
}
