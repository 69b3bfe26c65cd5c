//! Dialogue orchestrator tests with a scripted chat model.
//!
//! The model is replaced by a queue of canned responses; rooms, reservations
//! and conversations live in the in-memory implementations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use concierge_core::booking::BookingStep;
use concierge_core::catalog::memory::InMemoryCatalog;
use concierge_core::chat::{ChatMessage, ChatProvider, ChatResponse, ToolCall, ToolChoice, ToolSchema};
use concierge_core::clock::FixedClock;
use concierge_core::conversation::memory::InMemoryConversations;
use concierge_core::conversation::ConversationRepository;
use concierge_core::embedding::EmbeddingProvider;
use concierge_core::error::ProviderError;
use concierge_core::models::{Role, Room};
use concierge_core::retrieval::{RetrievalService, RetrievalSettings};
use concierge_core::store::memory::InMemoryStore;
use concierge_core::tools::FeatureFlags;

use villa_concierge::dialogue::{DialogueSettings, Orchestrator, APOLOGY_MESSAGE, REPHRASE_MESSAGE};

// ═══════════════════════════════════════════════════════════════════════
// Scripted model
// ═══════════════════════════════════════════════════════════════════════

struct ScriptedChat {
    script: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    /// Every request's messages, in call order.
    seen: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Duration,
}

impl ScriptedChat {
    fn new(script: Vec<Result<ChatResponse, ProviderError>>) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    fn with_delay(script: Vec<Result<ChatResponse, ProviderError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> Vec<ChatMessage> {
        self.seen.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
        choice: ToolChoice,
    ) -> Result<ChatResponse, ProviderError> {
        assert_eq!(choice, ToolChoice::Required);
        self.seen.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Http("script exhausted".to_string())))
    }
}

fn tool(name: &str, args: Value) -> Result<ChatResponse, ProviderError> {
    Ok(ChatResponse::ToolCall(ToolCall {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments: args.to_string(),
    }))
}

fn respond(message: &str) -> Result<ChatResponse, ProviderError> {
    tool("respond", json!({ "message": message }))
}

fn plain(text: &str) -> Result<ChatResponse, ProviderError> {
    Ok(ChatResponse::PlainText(text.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════
// Fixture
// ═══════════════════════════════════════════════════════════════════════

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn room(id: &str, slug: &str, capacity: u32, cents: i64, sort_order: i32) -> Room {
    Room {
        id: id.to_string(),
        slug: slug.to_string(),
        name: format!("Camera {}", slug),
        description: "Quiet room above the lemon grove.".to_string(),
        capacity,
        price_per_night_cents: cents,
        image_url: String::new(),
        features: vec!["Garden view".to_string()],
        is_active: true,
        sort_order,
    }
}

struct Harness {
    catalog: Arc<InMemoryCatalog>,
    conversations: Arc<InMemoryConversations>,
    orchestrator: Orchestrator,
}

fn harness(chat: Arc<ScriptedChat>, settings: DialogueSettings) -> Harness {
    harness_with_retrieval(chat, settings, None)
}

fn harness_with_retrieval(
    chat: Arc<ScriptedChat>,
    settings: DialogueSettings,
    retrieval: Option<Arc<RetrievalService>>,
) -> Harness {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_room(room("r1", "limone", 2, 18000, 0)).unwrap();
    catalog.add_room(room("r2", "portofino", 4, 25000, 1)).unwrap();
    let conversations = Arc::new(InMemoryConversations::new());
    let orchestrator = Orchestrator::new(
        conversations.clone(),
        catalog.clone(),
        chat,
        retrieval,
        Arc::new(FixedClock(d("2024-06-01"))),
        20,
        settings,
    );
    Harness {
        catalog,
        conversations,
        orchestrator,
    }
}

fn availability_args() -> Value {
    json!({ "checkIn": "2024-06-10", "checkOut": "2024-06-12", "guests": 2 })
}

fn reservation_args(confirm: bool) -> Value {
    json!({
        "roomSlug": "limone",
        "checkIn": "2024-06-10",
        "checkOut": "2024-06-12",
        "guestName": "Anna Rossi",
        "guestEmail": "anna@example.com",
        "guestsCount": 2,
        "confirm": confirm,
    })
}

/// The JSON of the last tool result in a request.
fn last_tool_result(messages: &[ChatMessage]) -> Value {
    messages
        .iter()
        .rev()
        .find_map(|m| match m {
            ChatMessage::ToolResult { content, .. } => Some(serde_json::from_str(content).unwrap()),
            _ => None,
        })
        .expect("request has no tool result")
}

// ═══════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_respond_ends_turn_and_persists_transcript() {
    let chat = ScriptedChat::new(vec![respond("Breakfast is served from 7 to 10.")]);
    let h = harness(chat.clone(), DialogueSettings::default());

    let reply = h
        .orchestrator
        .handle_message(Some("s1"), "When is breakfast?")
        .await
        .unwrap();
    assert!(!reply.error);
    assert_eq!(reply.session_id, "s1");
    assert_eq!(reply.message, "Breakfast is served from 7 to 10.");
    assert_eq!(reply.tool_calls, vec!["respond"]);
    assert!(reply.reservation_id.is_none());

    // System prompt first, then the guest message.
    let request = chat.request(0);
    assert!(matches!(&request[0], ChatMessage::System(p) if p.contains("Camera limone")));
    assert_eq!(request.last(), Some(&ChatMessage::User("When is breakfast?".to_string())));

    let conversation = h.conversations.find_by_session("s1").await.unwrap().unwrap();
    assert_eq!(conversation.message_count, 2);
    assert_eq!(conversation.messages[0].role, Role::User);
    assert_eq!(conversation.messages[1].role, Role::Assistant);
    assert_eq!(conversation.messages[1].metadata["toolCalls"], json!(["respond"]));
}

#[tokio::test]
async fn test_missing_session_gets_fresh_id() {
    let chat = ScriptedChat::new(vec![respond("Ciao!"), respond("Ciao again!")]);
    let h = harness(chat, DialogueSettings::default());

    let first = h.orchestrator.handle_message(None, "Hello").await.unwrap();
    let second = h.orchestrator.handle_message(Some("  "), "Hello").await.unwrap();
    assert!(uuid::Uuid::parse_str(&first.session_id).is_ok());
    assert_ne!(first.session_id, second.session_id);
}

#[tokio::test]
async fn test_two_phase_booking_across_turns() {
    let chat = ScriptedChat::new(vec![
        // Turn 1: availability, then answer.
        tool("check_availability", availability_args()),
        respond("Camera limone is free for those nights."),
        // Turn 2: preview.
        tool("create_reservation", reservation_args(false)),
        respond("Here is your summary: 2 nights, €360. Shall I confirm?"),
        // Turn 3: commit.
        tool("create_reservation", reservation_args(true)),
        respond("Your stay is booked!"),
    ]);
    let h = harness(chat.clone(), DialogueSettings::default());

    let first = h
        .orchestrator
        .handle_message(Some("guest"), "Is a room free June 10 to 12 for two?")
        .await
        .unwrap();
    assert_eq!(first.tool_calls, vec!["check_availability", "respond"]);
    let availability = last_tool_result(&chat.request(1));
    assert_eq!(availability["success"], true);
    assert_eq!(availability["available"][0]["slug"], "limone");

    let state = h.conversations.find_by_session("guest").await.unwrap().unwrap().booking;
    assert_eq!(state.step, BookingStep::CheckingAvailability);

    h.orchestrator
        .handle_message(Some("guest"), "Camera limone please, Anna Rossi, anna@example.com")
        .await
        .unwrap();
    let preview = last_tool_result(&chat.request(3));
    assert_eq!(preview["preview"], true);
    assert_eq!(preview["totalPrice"], 360.0);
    assert!(h.catalog.reservations().unwrap().is_empty());
    let state = h.conversations.find_by_session("guest").await.unwrap().unwrap().booking;
    assert_eq!(state.step, BookingStep::AwaitingConfirmation);
    assert!(state.preview_shown);

    let third = h
        .orchestrator
        .handle_message(Some("guest"), "Yes, confirm")
        .await
        .unwrap();
    let reservations = h.catalog.reservations().unwrap();
    assert_eq!(reservations.len(), 1);
    let stored_id = reservations[0].id.clone();

    // The reply carries the real id even though the model did not mention it.
    assert_eq!(third.reservation_id.as_deref(), Some(stored_id.as_str()));
    assert!(third.message.starts_with("Your stay is booked!"));
    assert!(third.message.contains(&stored_id));
    let committed = last_tool_result(&chat.request(5));
    assert_eq!(committed["reservationId"], stored_id.as_str());

    let conversation = h.conversations.find_by_session("guest").await.unwrap().unwrap();
    assert!(conversation.has_reservation);
    assert_eq!(conversation.booking.step, BookingStep::Confirmed);
    assert_eq!(conversation.booking.reservation_id.as_deref(), Some(stored_id.as_str()));
    assert_eq!(reservations[0].conversation_id.as_deref(), Some(conversation.id.as_str()));
}

#[tokio::test]
async fn test_commit_without_preview_is_rejected() {
    let chat = ScriptedChat::new(vec![
        tool("create_reservation", reservation_args(true)),
        respond("I need to show you a summary first."),
    ]);
    let h = harness(chat.clone(), DialogueSettings::default());

    let reply = h.orchestrator.handle_message(Some("s"), "Book it!").await.unwrap();
    assert!(!reply.error);
    assert!(reply.reservation_id.is_none());
    assert_eq!(last_tool_result(&chat.request(1))["error"], "preview_not_shown");
    assert!(h.catalog.reservations().unwrap().is_empty());
    let state = h.conversations.find_by_session("s").await.unwrap().unwrap().booking;
    assert_eq!(state.step, BookingStep::Idle);
}

#[tokio::test]
async fn test_preview_and_commit_in_one_turn_books_nothing() {
    let chat = ScriptedChat::new(vec![
        tool("create_reservation", reservation_args(false)),
        tool("create_reservation", reservation_args(true)),
        respond("Here is your summary: 2 nights, €360. Shall I confirm?"),
        // Next turn: the guest agrees.
        tool("create_reservation", reservation_args(true)),
        respond("Your stay is booked!"),
    ]);
    let h = harness(chat.clone(), DialogueSettings::default());

    let reply = h
        .orchestrator
        .handle_message(Some("eager"), "Camera limone June 10 to 12, Anna Rossi, anna@example.com")
        .await
        .unwrap();
    assert_eq!(
        reply.tool_calls,
        vec!["create_reservation", "create_reservation", "respond"]
    );
    assert!(!reply.error);
    assert!(reply.reservation_id.is_none());
    assert_eq!(last_tool_result(&chat.request(2))["error"], "preview_not_shown");
    assert!(h.catalog.reservations().unwrap().is_empty());

    let conversation = h.conversations.find_by_session("eager").await.unwrap().unwrap();
    assert!(!conversation.has_reservation);
    assert_eq!(conversation.booking.step, BookingStep::AwaitingConfirmation);

    let confirmed = h
        .orchestrator
        .handle_message(Some("eager"), "Yes, please book it")
        .await
        .unwrap();
    let reservations = h.catalog.reservations().unwrap();
    assert_eq!(reservations.len(), 1);
    assert_eq!(confirmed.reservation_id.as_deref(), Some(reservations[0].id.as_str()));
}

#[tokio::test]
async fn test_round_cap_leaves_state_untouched() {
    let chat = ScriptedChat::new(vec![
        tool("check_availability", availability_args()),
        tool("check_availability", availability_args()),
        tool("check_availability", availability_args()),
    ]);
    let settings = DialogueSettings {
        max_rounds: 3,
        ..DialogueSettings::default()
    };
    let h = harness(chat.clone(), settings);

    let reply = h.orchestrator.handle_message(Some("loop"), "Any rooms?").await.unwrap();
    assert!(reply.error);
    assert_eq!(reply.message, APOLOGY_MESSAGE);
    assert_eq!(reply.tool_calls.len(), 3);
    assert_eq!(chat.calls(), 3);

    let conversation = h.conversations.find_by_session("loop").await.unwrap().unwrap();
    assert_eq!(conversation.booking.step, BookingStep::Idle);
    // Only the guest message was stored.
    assert_eq!(conversation.message_count, 1);
}

#[tokio::test]
async fn test_plain_text_retried_once() {
    let chat = ScriptedChat::new(vec![plain("Sure, one moment"), respond("We have rooms.")]);
    let h = harness(chat.clone(), DialogueSettings::default());

    let reply = h.orchestrator.handle_message(Some("p"), "Rooms?").await.unwrap();
    assert!(!reply.error);
    assert_eq!(reply.message, "We have rooms.");
    assert_eq!(chat.calls(), 2);
}

#[tokio::test]
async fn test_plain_text_after_retries_fails_turn() {
    let chat = ScriptedChat::new(vec![plain("Hi"), plain("Hello")]);
    let h = harness(chat.clone(), DialogueSettings::default());

    let reply = h.orchestrator.handle_message(Some("p"), "Rooms?").await.unwrap();
    assert!(reply.error);
    assert_eq!(reply.message, REPHRASE_MESSAGE);
    assert_eq!(chat.calls(), 2);
}

#[tokio::test]
async fn test_provider_error_returns_apology() {
    let chat = ScriptedChat::new(vec![Err(ProviderError::Timeout)]);
    let h = harness(chat, DialogueSettings::default());

    let reply = h.orchestrator.handle_message(Some("e"), "Hello").await.unwrap();
    assert!(reply.error);
    assert_eq!(reply.message, APOLOGY_MESSAGE);
    assert!(reply.tool_calls.is_empty());
}

#[tokio::test]
async fn test_disabled_booking_fed_back_as_feature_disabled() {
    let chat = ScriptedChat::new(vec![
        tool("create_reservation", reservation_args(false)),
        respond("Please contact the hotel directly."),
    ]);
    let settings = DialogueSettings {
        flags: FeatureFlags {
            enable_booking: false,
            ..FeatureFlags::default()
        },
        ..DialogueSettings::default()
    };
    let h = harness(chat.clone(), settings);
    assert!(h
        .orchestrator
        .tool_schemas()
        .iter()
        .all(|s| s.name != "create_reservation"));

    let reply = h.orchestrator.handle_message(Some("f"), "Book a room").await.unwrap();
    assert!(!reply.error);
    let result = last_tool_result(&chat.request(1));
    assert_eq!(result["success"], false);
    assert_eq!(result["error"], "feature_disabled");
    assert!(matches!(&chat.request(0)[0], ChatMessage::System(p) if p.contains("DISABLED")));
}

#[tokio::test]
async fn test_unknown_tool_fed_back() {
    let chat = ScriptedChat::new(vec![
        tool("order_pizza", json!({})),
        respond("I can't order pizza, sorry."),
    ]);
    let h = harness(chat.clone(), DialogueSettings::default());

    h.orchestrator.handle_message(Some("u"), "Pizza?").await.unwrap();
    let result = last_tool_result(&chat.request(1));
    assert_eq!(result["error"], "unknown_function");
}

#[tokio::test]
async fn test_invalid_fields_reported_in_priority_order() {
    let mut args = reservation_args(false);
    args["guestsCount"] = json!(5);
    args["guestEmail"] = json!("not-an-email");
    let chat = ScriptedChat::new(vec![
        tool("create_reservation", args),
        respond("That room is too small."),
    ]);
    let h = harness(chat.clone(), DialogueSettings::default());

    h.orchestrator.handle_message(Some("v"), "Book for five").await.unwrap();
    let result = last_tool_result(&chat.request(1));
    assert_eq!(result["error"], "capacity_exceeded");
    assert_eq!(result["maxGuests"], 2);
}

struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Api {
            status: 401,
            message: "bad key".to_string(),
        })
    }
}

#[tokio::test]
async fn test_retrieval_failure_is_turn_fatal() {
    let chat = ScriptedChat::new(vec![respond("unused")]);
    let retrieval = Arc::new(RetrievalService::new(
        Arc::new(BrokenEmbedder),
        Arc::new(InMemoryStore::new()),
        None,
        RetrievalSettings::default(),
    ));
    let h = harness_with_retrieval(chat.clone(), DialogueSettings::default(), Some(retrieval));

    let reply = h.orchestrator.handle_message(Some("r"), "Is there parking?").await.unwrap();
    assert!(reply.error);
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn test_same_session_turns_are_serialized() {
    let chat = ScriptedChat::with_delay(
        vec![respond("first answer"), respond("second answer")],
        Duration::from_millis(50),
    );
    let h = Arc::new(harness(chat.clone(), DialogueSettings::default()));

    let a = {
        let h = h.clone();
        tokio::spawn(async move { h.orchestrator.handle_message(Some("same"), "one").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = {
        let h = h.clone();
        tokio::spawn(async move { h.orchestrator.handle_message(Some("same"), "two").await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let conversation = h.conversations.find_by_session("same").await.unwrap().unwrap();
    let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);

    // The second turn saw the first turn's reply.
    assert!(chat
        .request(1)
        .contains(&ChatMessage::Assistant("first answer".to_string())));
}
