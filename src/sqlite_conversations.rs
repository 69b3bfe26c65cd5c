//! SQLite-backed [`ConversationRepository`].
//!
//! The booking state is kept in `conversations.metadata_json` under
//! `bookingState`; the typed view is produced at this boundary only.
//! Loaded conversations carry only the newest `history_limit` messages
//! when a limit is set; `message_count` always counts the full transcript.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use concierge_core::booking::BookingState;
use concierge_core::conversation::{
    booking_state_from_metadata, store_booking_state, ConversationRepository,
};
use concierge_core::models::{Conversation, Message};

pub struct SqliteConversations {
    pool: SqlitePool,
    history_limit: Option<usize>,
}

impl SqliteConversations {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            history_limit: None,
        }
    }

    /// Load at most `limit` of the newest messages with each conversation.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    async fn load_metadata(&self, conversation_id: &str) -> Result<Value> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT metadata_json FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(raw) = raw else {
            bail!("conversation not found: {}", conversation_id);
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({})))
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    let metadata_json: String = row.get("metadata_json");
    let created_at: String = row.get("created_at");
    Ok(Message {
        role: role.parse()?,
        content: row.get("content"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_else(|_| serde_json::json!({})),
        created_at: parse_ts(&created_at),
    })
}

#[async_trait]
impl ConversationRepository for SqliteConversations {
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, session_id, has_reservation, message_count, metadata_json, created_at, updated_at \
             FROM conversations WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load conversation")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.get("id");
        let metadata_json: String = row.get("metadata_json");
        let metadata: Value =
            serde_json::from_str(&metadata_json).unwrap_or_else(|_| serde_json::json!({}));
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        // SQLite treats a negative LIMIT as no limit.
        let limit = self.history_limit.map(|n| n as i64).unwrap_or(-1);
        let message_rows = sqlx::query(
            "SELECT role, content, metadata_json, created_at FROM messages \
             WHERE conversation_id = ? ORDER BY rowid DESC LIMIT ?",
        )
        .bind(&id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut messages = message_rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();

        Ok(Some(Conversation {
            id,
            session_id: row.get("session_id"),
            has_reservation: row.get("has_reservation"),
            message_count: row.get("message_count"),
            booking: booking_state_from_metadata(&metadata),
            messages,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        }))
    }

    async fn create(&self, session_id: &str) -> Result<Conversation> {
        let booking = BookingState::default();
        let mut metadata = serde_json::json!({});
        store_booking_state(&mut metadata, &booking)?;
        let now = Utc::now().to_rfc3339();

        // A concurrent create for the same session keeps the first row.
        sqlx::query(
            r#"
            INSERT INTO conversations (id, session_id, has_reservation, message_count,
                                       metadata_json, created_at, updated_at)
            VALUES (?, ?, 0, 0, ?, ?, ?)
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(metadata.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to create conversation")?;

        match self.find_by_session(session_id).await? {
            Some(conversation) => Ok(conversation),
            None => bail!("conversation for session {} vanished after insert", session_id),
        }
    }

    async fn add_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, metadata_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.metadata.to_string())
        .bind(message.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to append message")?;

        let updated = sqlx::query(
            "UPDATE conversations SET message_count = message_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            bail!("conversation not found: {}", conversation_id);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_booking_state(&self, conversation_id: &str, state: &BookingState) -> Result<()> {
        let mut metadata = self.load_metadata(conversation_id).await?;
        store_booking_state(&mut metadata, state)?;

        sqlx::query("UPDATE conversations SET metadata_json = ?, updated_at = ? WHERE id = ?")
            .bind(metadata.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .context("Failed to store booking state")?;
        Ok(())
    }

    async fn mark_reservation(&self, conversation_id: &str) -> Result<()> {
        sqlx::query("UPDATE conversations SET has_reservation = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
