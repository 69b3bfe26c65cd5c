//! Dialogue orchestrator: one guest message in, one reply out.
//!
//! # Turn flow
//!
//! 1. Serialize on the session id, resolve or create the conversation.
//! 2. Build the context and persist the guest message before any model call.
//! 3. Retrieve knowledge for the raw message (skipped without an embedder).
//! 4. Render the system prompt and offer the tools allowed by the flags.
//! 5. Bounded loop: ask the model for exactly one tool call; `respond`
//!    ends the turn, any other tool is executed and its result fed back.
//! 6. Persist the booking state and the reply.
//!
//! Provider failures, repeated plain-text answers and round exhaustion end
//! the turn with an apology and leave the booking state as it was. The
//! exception is a reservation committed earlier in the same turn: its
//! state is saved right after the write and its id is still returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, Context as _, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use concierge_core::booking::{BookingError, BookingState};
use concierge_core::catalog::RoomCatalog;
use concierge_core::chat::{ChatMessage, ChatProvider, ChatResponse, ToolCall, ToolChoice, ToolSchema};
use concierge_core::clock::Clock;
use concierge_core::context::{ContextBuilder, ConversationContext};
use concierge_core::conversation::ConversationRepository;
use concierge_core::error::TurnError;
use concierge_core::models::Message;
use concierge_core::prompt::render_system_prompt;
use concierge_core::retrieval::RetrievalService;
use concierge_core::search::format_knowledge;
use concierge_core::store::SearchOptions;
use concierge_core::tools::{FeatureFlags, ToolContext, ToolRegistry};

use crate::config::Config;

/// Reply when a turn fails for any reason other than plain text.
pub const APOLOGY_MESSAGE: &str =
    "I'm sorry, I'm having trouble answering right now. Please try again in a moment.";

/// Reply when the model keeps answering without calling a tool.
pub const REPHRASE_MESSAGE: &str = "Mi scusi, I didn't understand. Could you rephrase?";

#[derive(Debug, Clone)]
pub struct DialogueSettings {
    pub max_rounds: u32,
    pub plain_text_retries: u32,
    pub default_guests: u32,
    pub flags: FeatureFlags,
    pub system_prompt: Option<String>,
    pub hotel_name: String,
    pub search: SearchOptions,
}

impl DialogueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_rounds: config.dialogue.max_rounds.max(1),
            plain_text_retries: config.dialogue.plain_text_retries,
            default_guests: config.dialogue.default_guests.max(1),
            flags: config.bot.flags(),
            system_prompt: config.bot.system_prompt.clone(),
            hotel_name: config.bot.hotel_name.clone(),
            search: config.retrieval.search_options(),
        }
    }
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            plain_text_retries: 1,
            default_guests: 2,
            flags: FeatureFlags::default(),
            system_prompt: None,
            hotel_name: "Villa Limone".to_string(),
            search: SearchOptions::default(),
        }
    }
}

/// The answer to one guest message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReply {
    pub session_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    /// Tool names the model called, in order.
    pub tool_calls: Vec<String>,
    pub error: bool,
}

/// One async mutex per session id.
#[derive(Default)]
pub struct SessionLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn holds `session_id`.
    pub async fn acquire(&self, session_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| anyhow!("session lock table poisoned"))?;
            // Drop idle entries so the table does not grow with every session.
            locks.retain(|id, lock| id == session_id || Arc::strong_count(lock) > 1);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutable turn state, kept outside the loop so a failed turn can still
/// report a reservation it created.
#[derive(Default)]
struct TurnProgress {
    /// Message count once the guest message is stored.
    turn: i64,
    booking: BookingState,
    tool_calls: Vec<String>,
    reservation_id: Option<String>,
    sources: Vec<Value>,
}

pub struct Orchestrator {
    conversations: Arc<dyn ConversationRepository>,
    catalog: Arc<dyn RoomCatalog>,
    chat: Arc<dyn ChatProvider>,
    retrieval: Option<Arc<RetrievalService>>,
    context: ContextBuilder,
    settings: DialogueSettings,
    locks: SessionLocks,
}

impl Orchestrator {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        catalog: Arc<dyn RoomCatalog>,
        chat: Arc<dyn ChatProvider>,
        retrieval: Option<Arc<RetrievalService>>,
        clock: Arc<dyn Clock>,
        history_window: usize,
        settings: DialogueSettings,
    ) -> Self {
        Self {
            context: ContextBuilder::new(catalog.clone(), clock, history_window),
            conversations,
            catalog,
            chat,
            retrieval,
            settings,
            locks: SessionLocks::new(),
        }
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    /// The tool catalog offered to the model under the current flags.
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        ToolRegistry::for_flags(&self.settings.flags).schemas()
    }

    /// Handle one guest message.
    ///
    /// `Err` only for storage failures that prevent even an apology
    /// (conversation lookup, persisting the guest message, saving the
    /// reply). Model and retrieval failures come back as a reply with
    /// `error: true`.
    pub async fn handle_message(&self, session_id: Option<&str>, text: &str) -> Result<TurnReply> {
        let session_id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let _guard = self.locks.acquire(&session_id).await?;

        let conversation = self
            .conversations
            .find_or_create(&session_id)
            .await
            .context("Failed to resolve conversation")?;
        let mut ctx = self.context.build(&conversation).await?;

        let user_message = Message::user(text);
        self.conversations
            .add_message(&conversation.id, &user_message)
            .await
            .context("Failed to store guest message")?;
        ctx.push_message(user_message);

        let mut progress = TurnProgress {
            turn: conversation.message_count + 1,
            booking: ctx.booking.clone(),
            ..TurnProgress::default()
        };

        match self.run_turn(&mut ctx, text, &mut progress).await {
            Ok(reply) => {
                let message = with_reservation_id(reply, progress.reservation_id.as_deref());
                self.conversations
                    .update_booking_state(&conversation.id, &progress.booking)
                    .await
                    .context("Failed to store booking state")?;

                let metadata = json!({
                    "toolCalls": progress.tool_calls,
                    "sources": progress.sources,
                    "reservationId": progress.reservation_id,
                });
                self.conversations
                    .add_message(
                        &conversation.id,
                        &Message::assistant(message.clone()).with_metadata(metadata),
                    )
                    .await
                    .context("Failed to store reply")?;

                info!(
                    session = %session_id,
                    rounds = progress.tool_calls.len(),
                    step = %progress.booking.step,
                    reservation = progress.reservation_id.is_some(),
                    "turn completed"
                );
                Ok(TurnReply {
                    session_id,
                    message,
                    reservation_id: progress.reservation_id,
                    tool_calls: progress.tool_calls,
                    error: false,
                })
            }
            Err(e) => {
                error!(session = %session_id, error = %e, tool_calls = ?progress.tool_calls, "turn failed");
                let base = match e {
                    TurnError::PlainText { .. } => REPHRASE_MESSAGE,
                    _ => APOLOGY_MESSAGE,
                };
                Ok(TurnReply {
                    session_id,
                    message: with_reservation_id(base.to_string(), progress.reservation_id.as_deref()),
                    reservation_id: progress.reservation_id,
                    tool_calls: progress.tool_calls,
                    error: true,
                })
            }
        }
    }

    async fn run_turn(
        &self,
        ctx: &mut ConversationContext,
        query: &str,
        progress: &mut TurnProgress,
    ) -> Result<String, TurnError> {
        if let Some(retrieval) = &self.retrieval {
            let hits = retrieval.retrieve(query, &self.settings.search).await?;
            debug!(hits = hits.len(), "knowledge retrieved");
            progress.sources = hits
                .iter()
                .map(|h| {
                    json!({
                        "documentId": h.chunk.document_id,
                        "sourceName": h.chunk.source_name,
                        "similarity": h.similarity,
                    })
                })
                .collect();
            ctx.knowledge = format_knowledge(&hits);
        }

        let registry = ToolRegistry::for_flags(&self.settings.flags);
        let schemas = registry.schemas();
        let system = render_system_prompt(
            self.settings.system_prompt.as_deref(),
            ctx,
            &self.settings.flags,
            &self.settings.hotel_name,
        );

        let mut messages = Vec::with_capacity(ctx.history.len() + 1 + 2 * self.settings.max_rounds as usize);
        messages.push(ChatMessage::System(system));
        messages.extend(ctx.history_messages());

        for round in 1..=self.settings.max_rounds {
            let call = self.request_tool_call(&messages, &schemas).await?;
            debug!(round, tool = %call.name, "model called tool");
            progress.tool_calls.push(call.name.clone());

            let outcome = {
                let mut tool_ctx = ToolContext {
                    booking: &mut progress.booking,
                    catalog: self.catalog.as_ref(),
                    clock: self.context.clock(),
                    rooms: &ctx.rooms,
                    conversation_id: &ctx.conversation_id,
                    turn: progress.turn,
                    default_guests: self.settings.default_guests,
                };
                registry
                    .dispatch(&call, &mut tool_ctx)
                    .await
                    .map_err(tool_failure)?
            };

            if let Some(reply) = outcome.reply {
                return Ok(reply);
            }

            if let Some(code) = outcome.error {
                warn!(round, tool = %call.name, error = %code, "tool call failed");
            }

            if let Some(id) = &outcome.reservation_id {
                progress.reservation_id = Some(id.clone());
                self.persist_commit(&ctx.conversation_id, &progress.booking)
                    .await
                    .map_err(TurnError::Storage)?;
            }

            messages.push(ChatMessage::AssistantToolCall(call.clone()));
            messages.push(ChatMessage::ToolResult {
                call_id: call.id,
                content: outcome.to_message_json(),
            });
        }

        Err(TurnError::RoundsExhausted(self.settings.max_rounds))
    }

    /// One tool call from the model, retrying plain-text answers.
    async fn request_tool_call(
        &self,
        messages: &[ChatMessage],
        schemas: &[ToolSchema],
    ) -> Result<ToolCall, TurnError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.chat.chat(messages, schemas, ToolChoice::Required).await? {
                ChatResponse::ToolCall(call) => return Ok(call),
                ChatResponse::PlainText(_) if attempts > self.settings.plain_text_retries => {
                    return Err(TurnError::PlainText { attempts });
                }
                ChatResponse::PlainText(_) => {
                    warn!(attempts, "model answered in plain text despite required tool choice, retrying");
                }
            }
        }
    }

    /// Save a committed booking immediately so a later failure in the
    /// turn cannot lose it.
    async fn persist_commit(&self, conversation_id: &str, booking: &BookingState) -> Result<()> {
        self.conversations
            .update_booking_state(conversation_id, booking)
            .await?;
        self.conversations.mark_reservation(conversation_id).await
    }
}

/// A tool that could not run at all. Booking guard failures keep their
/// type; anything else came from storage.
fn tool_failure(e: anyhow::Error) -> TurnError {
    match e.downcast::<BookingError>() {
        Ok(booking) => TurnError::Booking(booking),
        Err(other) => TurnError::Storage(other),
    }
}

/// Make sure the guest sees the real reservation id.
fn with_reservation_id(message: String, reservation_id: Option<&str>) -> String {
    match reservation_id {
        Some(id) if !message.contains(id) => format!("{}\n\nReservation ID: {}", message, id),
        _ => message,
    }
}
