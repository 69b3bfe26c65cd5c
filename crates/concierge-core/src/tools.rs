//! Tool catalog and dispatcher for the concierge model.
//!
//! The model acts only through tools: `respond` carries the user-facing
//! message, `check_availability` and `create_reservation` touch the
//! catalog. Which tools are offered depends on [`FeatureFlags`]; a call to
//! a disabled tool is answered with `feature_disabled`, never executed.
//!
//! Tool failures are data: every validation or guard failure comes back
//! as a [`ToolOutcome`] with `success: false` and a [`ToolErrorCode`],
//! which the orchestrator feeds to the model in the next round. An `Err`
//! from [`Tool::execute`] means the infrastructure itself failed.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::booking::{AvailabilitySnapshot, AvailableRoom, BookingError, BookingQuote, BookingState};
use crate::catalog::RoomCatalog;
use crate::chat::{ToolCall, ToolSchema};
use crate::clock::Clock;
use crate::models::{cents_to_euros, NewReservation, Room};

pub const RESPOND: &str = "respond";
pub const CHECK_AVAILABILITY: &str = "check_availability";
pub const CREATE_RESERVATION: &str = "create_reservation";

const AVAILABILITY_DISABLED_MESSAGE: &str = "Availability checking is currently disabled. \
Please contact the hotel directly for availability inquiries.";
const BOOKING_DISABLED_MESSAGE: &str = "Online booking is currently disabled. \
Please contact the hotel directly to make a reservation.";

// ═══════════════════════════════════════════════════════════════════════
// Error codes, flags and outcomes
// ═══════════════════════════════════════════════════════════════════════

/// Machine-readable reason a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    #[error("check_in_past")]
    CheckInPast,
    #[error("invalid_dates")]
    InvalidDates,
    #[error("missing_required_fields")]
    MissingRequiredFields,
    #[error("room_not_found")]
    RoomNotFound,
    #[error("capacity_exceeded")]
    CapacityExceeded,
    #[error("invalid_email")]
    InvalidEmail,
    #[error("preview_not_shown")]
    PreviewNotShown,
    #[error("invalid_state")]
    InvalidState,
    #[error("creation_failed")]
    CreationFailed,
    #[error("feature_disabled")]
    FeatureDisabled,
    #[error("unknown_function")]
    UnknownFunction,
    #[error("invalid_arguments")]
    InvalidArguments,
}

/// Operator switches for the concierge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub enable_booking: bool,
    pub enable_availability: bool,
    pub enable_recommendations: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_booking: true,
            enable_availability: true,
            enable_recommendations: true,
        }
    }
}

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    pub error: Option<ToolErrorCode>,
    /// Structured details for the model (always a JSON object).
    pub data: Value,
    /// Set only when a reservation row was written during this call.
    pub reservation_id: Option<String>,
    /// Set only by `respond`: the final message for the guest.
    pub reply: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data,
            reservation_id: None,
            reply: None,
        }
    }

    pub fn failed(code: ToolErrorCode, data: Value) -> Self {
        Self {
            success: false,
            error: Some(code),
            data,
            reservation_id: None,
            reply: None,
        }
    }

    pub fn reply(message: impl Into<String>) -> Self {
        Self {
            reply: Some(message.into()),
            ..Self::ok(json!({}))
        }
    }

    /// The tool-result message content: `{success, error?, reservationId?, ...data}`.
    pub fn to_message_json(&self) -> String {
        let mut body = match &self.data {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        body.insert("success".to_string(), Value::Bool(self.success));
        if let Some(code) = self.error {
            body.insert("error".to_string(), json!(code));
        }
        if let Some(id) = &self.reservation_id {
            body.insert("reservationId".to_string(), Value::String(id.clone()));
        }
        Value::Object(body).to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool trait and execution context
// ═══════════════════════════════════════════════════════════════════════

/// What a tool may read and change during one call.
pub struct ToolContext<'a> {
    /// The turn's working copy of the booking state.
    pub booking: &'a mut BookingState,
    pub catalog: &'a dyn RoomCatalog,
    pub clock: &'a dyn Clock,
    /// Active rooms as shown to the model this turn.
    pub rooms: &'a [Room],
    pub conversation_id: &'a str,
    /// Current guest turn: the conversation's message count including
    /// the guest message being answered.
    pub turn: i64,
    /// Party size assumed when `check_availability` omits `guests`.
    pub default_guests: u32,
}

/// A function the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name as declared to the model.
    fn name(&self) -> &str;

    /// Usage guidance for the model: when to call and when not to.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> anyhow::Result<ToolOutcome>;
}

// ═══════════════════════════════════════════════════════════════════════
// respond
// ═══════════════════════════════════════════════════════════════════════

pub struct RespondTool;

#[async_trait]
impl Tool for RespondTool {
    fn name(&self) -> &str {
        RESPOND
    }

    fn description(&self) -> &str {
        "Send a message to the guest. This is the only way to talk to the guest: use it to answer \
         questions about the hotel, ask for missing booking details, present availability or a \
         reservation preview, and report the result of any other function. Do not use it to claim \
         a booking is confirmed unless create_reservation with confirm=true returned a reservationId."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The reply to the guest, in the language the guest wrote in."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &mut ToolContext<'_>) -> anyhow::Result<ToolOutcome> {
        match arg_str(args, &["message", "response"]) {
            Some(message) => Ok(ToolOutcome::reply(message)),
            None => Ok(ToolOutcome::failed(
                ToolErrorCode::InvalidArguments,
                json!({ "message": "respond requires a non-empty 'message'" }),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// check_availability
// ═══════════════════════════════════════════════════════════════════════

pub struct CheckAvailabilityTool;

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str {
        CHECK_AVAILABILITY
    }

    fn description(&self) -> &str {
        "Check which rooms are free for a date range and party size. Call it as soon as the guest \
         wants to stay and both check-in and check-out (or check-in and a number of nights) are \
         known. Resolve relative dates such as 'tomorrow' against CURRENT DATE from the system \
         prompt and pass YYYY-MM-DD. If a date is missing, use respond to ask for it instead. The \
         result is for you, not the guest: present it with respond."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "checkIn": { "type": "string", "description": "Check-in date, YYYY-MM-DD" },
                "checkOut": { "type": "string", "description": "Check-out date, YYYY-MM-DD, after checkIn" },
                "guests": { "type": "integer", "minimum": 1, "description": "Number of guests (default 2)" }
            },
            "required": ["checkIn", "checkOut"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> anyhow::Result<ToolOutcome> {
        let (check_in_raw, check_out_raw) = match (arg_str(args, &["checkIn"]), arg_str(args, &["checkOut"])) {
            (Some(a), Some(b)) => (a, b),
            (a, b) => {
                let mut missing = Vec::new();
                if a.is_none() {
                    missing.push("checkIn");
                }
                if b.is_none() {
                    missing.push("checkOut");
                }
                return Ok(missing_fields(&missing, "Cannot check availability"));
            }
        };

        let (check_in, check_out) = match validate_stay(check_in_raw, check_out_raw, ctx.clock.today()) {
            Ok(dates) => dates,
            Err(outcome) => return Ok(outcome),
        };

        let guests = arg_u32(args, &["guests", "guestsCount"])
            .filter(|g| *g > 0)
            .unwrap_or(ctx.default_guests);

        let free = ctx.catalog.find_available(check_in, check_out, guests).await?;
        let nights = (check_out - check_in).num_days();

        let available: Vec<AvailableRoom> = free
            .iter()
            .map(|room| AvailableRoom {
                slug: room.slug.clone(),
                name: room.name.clone(),
                capacity: room.capacity,
                price_per_night: room.price_per_night(),
                total_price: cents_to_euros(room.price_per_night_cents * nights),
                features: room.features.clone(),
            })
            .collect();
        let unavailable: Vec<String> = ctx
            .rooms
            .iter()
            .filter(|r| !free.iter().any(|f| f.slug == r.slug))
            .map(|r| r.slug.clone())
            .collect();

        let snapshot = AvailabilitySnapshot {
            check_in,
            check_out,
            guests,
            nights,
            has_rooms: !available.is_empty(),
            available,
            unavailable,
        };
        info!(
            nights,
            guests,
            available = snapshot.available.len(),
            "availability checked"
        );

        let data = serde_json::to_value(&snapshot)?;
        ctx.booking.record_availability(snapshot);
        Ok(ToolOutcome::ok(data))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// create_reservation
// ═══════════════════════════════════════════════════════════════════════

/// Two-phase reservation: `confirm=false` records a preview and writes
/// nothing; `confirm=true` writes the reservation, and only for the
/// exact quote that was previewed.
pub struct CreateReservationTool;

#[async_trait]
impl Tool for CreateReservationTool {
    fn name(&self) -> &str {
        CREATE_RESERVATION
    }

    fn description(&self) -> &str {
        "Create a reservation in two phases. Only call it once the room (by slug from AVAILABLE \
         ROOMS), dates, guest full name, guest email and number of guests are all known; otherwise \
         use respond to ask for what is missing. Phase 1: call with confirm=false to get a preview, \
         then show it to the guest with respond and ask whether to confirm. Phase 2: call with \
         confirm=true only after the guest explicitly agrees to that preview. Never call \
         confirm=true first, and never invent a reservation id: use the reservationId this \
         function returns."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "roomSlug": { "type": "string", "description": "Exact room slug from AVAILABLE ROOMS" },
                "checkIn": { "type": "string", "description": "Check-in date, YYYY-MM-DD" },
                "checkOut": { "type": "string", "description": "Check-out date, YYYY-MM-DD" },
                "guestName": { "type": "string", "description": "Guest full name" },
                "guestEmail": { "type": "string", "description": "Guest email address" },
                "guestsCount": { "type": "integer", "minimum": 1, "description": "Number of guests" },
                "confirm": {
                    "type": "boolean",
                    "description": "false for the preview (phase 1), true to book after the guest confirmed (phase 2)"
                }
            },
            "required": ["roomSlug", "checkIn", "checkOut", "guestName", "guestEmail", "guestsCount", "confirm"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> anyhow::Result<ToolOutcome> {
        let room_slug = arg_str(args, &["roomSlug"]);
        let check_in_raw = arg_str(args, &["checkIn"]);
        let check_out_raw = arg_str(args, &["checkOut"]);
        let guest_name = arg_str(args, &["guestName"]);
        let guest_email = arg_str(args, &["guestEmail"]);
        let guests = arg_u32(args, &["guestsCount", "guests"]).filter(|g| *g > 0);

        let (
            Some(room_slug),
            Some(check_in_raw),
            Some(check_out_raw),
            Some(guest_name),
            Some(guest_email),
            Some(guests),
        ) = (room_slug, check_in_raw, check_out_raw, guest_name, guest_email, guests)
        else {
            let missing: Vec<&str> = [
                ("roomSlug", room_slug.is_none()),
                ("checkIn", check_in_raw.is_none()),
                ("checkOut", check_out_raw.is_none()),
                ("guestName", guest_name.is_none()),
                ("guestEmail", guest_email.is_none()),
                ("guestsCount", guests.is_none()),
            ]
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(field, _)| *field)
            .collect();
            warn!(missing = ?missing, "create_reservation called with missing fields");
            return Ok(missing_fields(&missing, "Cannot create reservation"));
        };

        let Some(room) = ctx.rooms.iter().find(|r| r.slug == room_slug).cloned() else {
            return Ok(ToolOutcome::failed(
                ToolErrorCode::RoomNotFound,
                json!({
                    "roomSlug": room_slug,
                    "availableRooms": ctx.rooms.iter().map(|r| r.slug.as_str()).collect::<Vec<_>>(),
                }),
            ));
        };

        if !room.can_accommodate(guests) {
            return Ok(ToolOutcome::failed(
                ToolErrorCode::CapacityExceeded,
                json!({
                    "roomName": room.name,
                    "maxGuests": room.capacity,
                    "requestedGuests": guests,
                }),
            ));
        }

        if !is_valid_email(guest_email) {
            return Ok(ToolOutcome::failed(
                ToolErrorCode::InvalidEmail,
                json!({ "email": guest_email, "message": "The email address does not look valid" }),
            ));
        }

        let (check_in, check_out) = match validate_stay(check_in_raw, check_out_raw, ctx.clock.today()) {
            Ok(dates) => dates,
            Err(outcome) => return Ok(outcome),
        };

        let nights = (check_out - check_in).num_days();
        let total_cents = room.price_per_night_cents * nights;
        let quote = BookingQuote {
            room_slug: room.slug.clone(),
            check_in,
            check_out,
            guests,
            guest_name: guest_name.to_string(),
            guest_email: guest_email.to_string(),
        };

        if !arg_bool(args, "confirm") {
            ctx.booking.record_preview(&quote, ctx.turn);
            info!(room = %room.slug, nights, "reservation preview recorded");
            return Ok(ToolOutcome::ok(json!({
                "preview": true,
                "room": { "name": room.name, "slug": room.slug },
                "checkIn": check_in,
                "checkOut": check_out,
                "nights": nights,
                "guestsCount": guests,
                "guestName": quote.guest_name,
                "guestEmail": quote.guest_email,
                "totalPrice": cents_to_euros(total_cents),
                "message": "Preview only, no reservation exists yet. Show these details and ask the guest to confirm.",
            })));
        }

        if let Err(e) = ctx.booking.authorize_commit(&quote, ctx.turn) {
            warn!(step = %ctx.booking.step, reason = %e, "reservation commit rejected");
            let next = match e {
                BookingError::AwaitingGuestReply => {
                    "Show the preview to the guest with respond and wait for their confirmation."
                }
                _ => "Call create_reservation with confirm=false and show the preview first.",
            };
            return Ok(ToolOutcome::failed(
                e.code(),
                json!({
                    "step": ctx.booking.step,
                    "message": format!("{}. {}", e, next),
                }),
            ));
        }

        let stored_room = match ctx.catalog.find_by_slug(&room.slug).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                return Ok(ToolOutcome::failed(
                    ToolErrorCode::RoomNotFound,
                    json!({ "roomSlug": room.slug }),
                ))
            }
            Err(e) => return Ok(creation_failed(&e)),
        };

        let new = NewReservation {
            room_id: stored_room.id.clone(),
            guest_name: quote.guest_name.clone(),
            guest_email: quote.guest_email.clone(),
            check_in,
            check_out,
            guests_count: guests,
            total_price_cents: stored_room.price_per_night_cents * nights,
            conversation_id: Some(ctx.conversation_id.to_string()),
        };
        let created = match ctx.catalog.create_reservation(&new).await {
            Ok(created) => created,
            Err(e) => return Ok(creation_failed(&e)),
        };

        ctx.booking.record_commit(&quote, &created.id, ctx.turn)?;
        info!(reservation_id = %created.id, room = %room.slug, "reservation created");

        Ok(ToolOutcome {
            reservation_id: Some(created.id.clone()),
            ..ToolOutcome::ok(json!({
                "roomName": room.name,
                "checkIn": check_in,
                "checkOut": check_out,
                "nights": nights,
                "totalPrice": cents_to_euros(created.total_price_cents),
                "guestEmail": created.guest_email,
                "status": created.status.as_str(),
                "message": "Reservation created. Give the guest this exact reservationId.",
            }))
        })
    }
}

fn creation_failed(e: &anyhow::Error) -> ToolOutcome {
    warn!(error = %e, "reservation write failed");
    ToolOutcome::failed(
        ToolErrorCode::CreationFailed,
        json!({ "errorMessage": e.to_string() }),
    )
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// The tools offered to the model for one set of feature flags.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// `respond` always; `check_availability` and `create_reservation`
    /// when their flag is on.
    pub fn for_flags(flags: &FeatureFlags) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RespondTool));
        if flags.enable_availability {
            registry.register(Box::new(CheckAvailabilityTool));
        }
        if flags.enable_booking {
            registry.register(Box::new(CreateReservationTool));
        }
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Execute one model tool call.
    ///
    /// Unregistered names are rejected: known tools as `feature_disabled`,
    /// anything else as `unknown_function`. Arguments that are not a JSON
    /// object are `invalid_arguments`.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &mut ToolContext<'_>) -> anyhow::Result<ToolOutcome> {
        let Some(tool) = self.find(&call.name) else {
            let outcome = match call.name.as_str() {
                CHECK_AVAILABILITY => ToolOutcome::failed(
                    ToolErrorCode::FeatureDisabled,
                    json!({ "message": AVAILABILITY_DISABLED_MESSAGE }),
                ),
                CREATE_RESERVATION => ToolOutcome::failed(
                    ToolErrorCode::FeatureDisabled,
                    json!({ "message": BOOKING_DISABLED_MESSAGE }),
                ),
                other => ToolOutcome::failed(
                    ToolErrorCode::UnknownFunction,
                    json!({ "message": format!("Unknown function: {}", other) }),
                ),
            };
            warn!(tool = %call.name, error = ?outcome.error, "tool call rejected");
            return Ok(outcome);
        };

        let args = if call.arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(v @ Value::Object(_)) => v,
                Ok(_) | Err(_) => {
                    return Ok(ToolOutcome::failed(
                        ToolErrorCode::InvalidArguments,
                        json!({ "message": format!("Arguments for {} must be a JSON object", call.name) }),
                    ))
                }
            }
        };

        tool.execute(&args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Argument helpers
// ═══════════════════════════════════════════════════════════════════════

/// First non-empty string among `keys`, trimmed.
fn arg_str<'v>(args: &'v Value, keys: &[&str]) -> Option<&'v str> {
    keys.iter()
        .filter_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// A count given as a JSON number or a numeric string.
fn arg_u32(args: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().find_map(|k| match args.get(*k)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    })
}

/// `true`, `"true"` and `"1"` (or the number 1) are true; anything else is false.
fn arg_bool(args: &Value, key: &str) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// `YYYY-MM-DD`, tolerating a trailing time part.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Parse and sanity-check a stay against `today`.
fn validate_stay(
    check_in_raw: &str,
    check_out_raw: &str,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), ToolOutcome> {
    let (Some(check_in), Some(check_out)) = (parse_date(check_in_raw), parse_date(check_out_raw)) else {
        return Err(ToolOutcome::failed(
            ToolErrorCode::InvalidDates,
            json!({
                "checkIn": check_in_raw,
                "checkOut": check_out_raw,
                "message": "Dates must be given as YYYY-MM-DD",
            }),
        ));
    };
    if check_in < today {
        return Err(ToolOutcome::failed(
            ToolErrorCode::CheckInPast,
            json!({
                "checkIn": check_in_raw,
                "today": today,
                "message": "Check-in date cannot be in the past",
            }),
        ));
    }
    if check_out <= check_in {
        return Err(ToolOutcome::failed(
            ToolErrorCode::InvalidDates,
            json!({
                "checkIn": check_in_raw,
                "checkOut": check_out_raw,
                "message": "Check-out must be after check-in",
            }),
        ));
    }
    Ok((check_in, check_out))
}

fn missing_fields(missing: &[&str], what: &str) -> ToolOutcome {
    ToolOutcome::failed(
        ToolErrorCode::MissingRequiredFields,
        json!({
            "missingFields": missing,
            "message": format!(
                "{}: missing {}. Ask the guest for this information first.",
                what,
                missing.join(", ")
            ),
        }),
    )
}

/// `local@domain.tld` with no whitespace and a single `@`.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::BookingStep;
    use crate::catalog::memory::InMemoryCatalog;
    use crate::clock::FixedClock;
    use crate::models::{Reservation, ReservationStatus};

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn room(id: &str, slug: &str, capacity: u32, cents: i64, sort_order: i32) -> Room {
        Room {
            id: id.to_string(),
            slug: slug.to_string(),
            name: format!("Camera {}", slug),
            description: String::new(),
            capacity,
            price_per_night_cents: cents,
            image_url: String::new(),
            features: vec!["sea view".to_string()],
            is_active: true,
            sort_order,
        }
    }

    struct Fixture {
        catalog: InMemoryCatalog,
        rooms: Vec<Room>,
        booking: BookingState,
        clock: FixedClock,
        turn: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let rooms = vec![
                room("r1", "limone", 2, 18000, 0),
                room("r2", "portofino", 4, 25000, 1),
            ];
            let catalog = InMemoryCatalog::new();
            for r in &rooms {
                catalog.add_room(r.clone()).unwrap();
            }
            Self {
                catalog,
                rooms,
                booking: BookingState::default(),
                clock: FixedClock(d("2024-06-01")),
                turn: 0,
            }
        }

        /// One call in a new guest turn.
        async fn call(&mut self, registry: &ToolRegistry, name: &str, args: Value) -> ToolOutcome {
            self.turn += 2;
            self.call_in_turn(registry, name, args).await
        }

        /// One more call in the current guest turn.
        async fn call_in_turn(&mut self, registry: &ToolRegistry, name: &str, args: Value) -> ToolOutcome {
            let call = ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            };
            let mut ctx = ToolContext {
                booking: &mut self.booking,
                catalog: &self.catalog,
                clock: &self.clock,
                rooms: &self.rooms,
                conversation_id: "conv-1",
                turn: self.turn,
                default_guests: 2,
            };
            registry.dispatch(&call, &mut ctx).await.unwrap()
        }
    }

    fn booking_args(confirm: Value) -> Value {
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

    fn all_tools() -> ToolRegistry {
        ToolRegistry::for_flags(&FeatureFlags::default())
    }

    // ─── Catalog ───

    #[test]
    fn test_catalog_follows_flags() {
        let names = |flags: FeatureFlags| -> Vec<String> {
            ToolRegistry::for_flags(&flags)
                .schemas()
                .into_iter()
                .map(|s| s.name)
                .collect()
        };
        assert_eq!(
            names(FeatureFlags::default()),
            vec![RESPOND, CHECK_AVAILABILITY, CREATE_RESERVATION]
        );
        assert_eq!(
            names(FeatureFlags {
                enable_booking: false,
                ..FeatureFlags::default()
            }),
            vec![RESPOND, CHECK_AVAILABILITY]
        );
        assert_eq!(
            names(FeatureFlags {
                enable_availability: false,
                enable_booking: false,
                ..FeatureFlags::default()
            }),
            vec![RESPOND]
        );
    }

    #[test]
    fn test_schemas_declare_required_fields() {
        for schema in all_tools().schemas() {
            assert_eq!(schema.parameters["type"], "object");
            assert!(schema.parameters["required"].is_array(), "{}", schema.name);
            assert!(!schema.description.is_empty());
        }
    }

    // ─── Dispatch ───

    #[tokio::test]
    async fn test_disabled_booking_rejected() {
        let mut fx = Fixture::new();
        let registry = ToolRegistry::for_flags(&FeatureFlags {
            enable_booking: false,
            ..FeatureFlags::default()
        });
        let outcome = fx.call(&registry, CREATE_RESERVATION, booking_args(json!(true))).await;
        assert_eq!(outcome.error, Some(ToolErrorCode::FeatureDisabled));
        assert_eq!(outcome.data["message"], BOOKING_DISABLED_MESSAGE);
        assert!(fx.catalog.reservations().unwrap().is_empty());
        assert_eq!(fx.booking, BookingState::default());
    }

    #[tokio::test]
    async fn test_disabled_availability_rejected() {
        let mut fx = Fixture::new();
        let registry = ToolRegistry::for_flags(&FeatureFlags {
            enable_availability: false,
            ..FeatureFlags::default()
        });
        let outcome = fx
            .call(&registry, CHECK_AVAILABILITY, json!({"checkIn": "2024-06-10", "checkOut": "2024-06-12"}))
            .await;
        assert_eq!(outcome.error, Some(ToolErrorCode::FeatureDisabled));
        assert_eq!(outcome.data["message"], AVAILABILITY_DISABLED_MESSAGE);
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let mut fx = Fixture::new();
        let outcome = fx.call(&all_tools(), "answer_question", json!({"response": "hi"})).await;
        assert_eq!(outcome.error, Some(ToolErrorCode::UnknownFunction));
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_invalid_json_arguments() {
        let mut fx = Fixture::new();
        let call = ToolCall {
            id: "c".to_string(),
            name: RESPOND.to_string(),
            arguments: "{not json".to_string(),
        };
        let mut ctx = ToolContext {
            booking: &mut fx.booking,
            catalog: &fx.catalog,
            clock: &fx.clock,
            rooms: &fx.rooms,
            conversation_id: "conv-1",
            turn: 1,
            default_guests: 2,
        };
        let outcome = all_tools().dispatch(&call, &mut ctx).await.unwrap();
        assert_eq!(outcome.error, Some(ToolErrorCode::InvalidArguments));
    }

    #[tokio::test]
    async fn test_respond_returns_reply() {
        let mut fx = Fixture::new();
        let outcome = fx.call(&all_tools(), RESPOND, json!({"message": "Buongiorno!"})).await;
        assert_eq!(outcome.reply.as_deref(), Some("Buongiorno!"));
        let empty = fx.call(&all_tools(), RESPOND, json!({"message": "  "})).await;
        assert_eq!(empty.error, Some(ToolErrorCode::InvalidArguments));
    }

    #[test]
    fn test_message_json_shape() {
        let mut outcome = ToolOutcome::ok(json!({"roomName": "Camera limone", "success": false}));
        outcome.reservation_id = Some("res-9".to_string());
        let v: Value = serde_json::from_str(&outcome.to_message_json()).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["reservationId"], "res-9");
        assert_eq!(v["roomName"], "Camera limone");
        assert!(v.get("error").is_none());

        let failed = ToolOutcome::failed(ToolErrorCode::CheckInPast, json!({}));
        let v: Value = serde_json::from_str(&failed.to_message_json()).unwrap();
        assert_eq!(v["error"], "check_in_past");
        assert_eq!(v["success"], false);
    }

    // ─── check_availability ───

    #[tokio::test]
    async fn test_check_in_past() {
        let mut fx = Fixture::new();
        let outcome = fx
            .call(
                &all_tools(),
                CHECK_AVAILABILITY,
                json!({"checkIn": "2020-01-01", "checkOut": "2020-01-02", "guests": 2}),
            )
            .await;
        assert_eq!(outcome.error, Some(ToolErrorCode::CheckInPast));
        assert_eq!(fx.booking.step, BookingStep::Idle);
    }

    #[tokio::test]
    async fn test_checkout_not_after_checkin() {
        let mut fx = Fixture::new();
        let outcome = fx
            .call(
                &all_tools(),
                CHECK_AVAILABILITY,
                json!({"checkIn": "2024-06-10", "checkOut": "2024-06-10"}),
            )
            .await;
        assert_eq!(outcome.error, Some(ToolErrorCode::InvalidDates));
        let garbage = fx
            .call(
                &all_tools(),
                CHECK_AVAILABILITY,
                json!({"checkIn": "next friday", "checkOut": "2024-06-10"}),
            )
            .await;
        assert_eq!(garbage.error, Some(ToolErrorCode::InvalidDates));
    }

    #[tokio::test]
    async fn test_availability_excludes_overlapping_reservation() {
        let mut fx = Fixture::new();
        fx.catalog
            .add_reservation(Reservation {
                id: "existing".to_string(),
                room_id: "r1".to_string(),
                guest_name: "X".to_string(),
                guest_email: "x@example.com".to_string(),
                check_in: d("2024-06-10"),
                check_out: d("2024-06-15"),
                guests_count: 2,
                total_price_cents: 0,
                status: ReservationStatus::Confirmed,
                conversation_id: None,
            })
            .unwrap();

        let outcome = fx
            .call(
                &all_tools(),
                CHECK_AVAILABILITY,
                json!({"checkIn": "2024-06-12", "checkOut": "2024-06-14", "guests": 2}),
            )
            .await;
        assert!(outcome.success);
        let available: Vec<&str> = outcome.data["available"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["slug"].as_str().unwrap())
            .collect();
        assert_eq!(available, vec!["portofino"]);
        assert_eq!(outcome.data["unavailable"], json!(["limone"]));
        assert_eq!(outcome.data["nights"], 2);
        assert_eq!(outcome.data["available"][0]["totalPrice"], 500.0);
        assert_eq!(outcome.data["hasRooms"], true);

        assert_eq!(fx.booking.step, BookingStep::CheckingAvailability);
        assert_eq!(fx.booking.check_in, Some(d("2024-06-12")));
        assert!(fx.booking.availability_result.is_some());
    }

    #[tokio::test]
    async fn test_guests_default_and_string_numbers() {
        let mut fx = Fixture::new();
        let outcome = fx
            .call(
                &all_tools(),
                CHECK_AVAILABILITY,
                json!({"checkIn": "2024-06-10", "checkOut": "2024-06-11"}),
            )
            .await;
        assert_eq!(outcome.data["guests"], 2);

        let four = fx
            .call(
                &all_tools(),
                CHECK_AVAILABILITY,
                json!({"checkIn": "2024-06-10", "checkOut": "2024-06-11", "guests": "4"}),
            )
            .await;
        assert_eq!(four.data["guests"], 4);
        assert_eq!(four.data["available"].as_array().unwrap().len(), 1);
    }

    // ─── create_reservation ───

    #[tokio::test]
    async fn test_commit_without_preview_rejected() {
        let mut fx = Fixture::new();
        let outcome = fx.call(&all_tools(), CREATE_RESERVATION, booking_args(json!(true))).await;
        assert_eq!(outcome.error, Some(ToolErrorCode::PreviewNotShown));
        assert!(outcome.reservation_id.is_none());
        assert!(fx.catalog.reservations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_phase_happy_path() {
        let mut fx = Fixture::new();
        let registry = all_tools();

        let preview = fx.call(&registry, CREATE_RESERVATION, booking_args(json!(false))).await;
        assert!(preview.success);
        assert_eq!(preview.data["preview"], true);
        assert_eq!(preview.data["totalPrice"], 360.0);
        assert!(fx.catalog.reservations().unwrap().is_empty());
        assert_eq!(fx.booking.step, BookingStep::AwaitingConfirmation);
        assert!(fx.booking.preview_shown);

        let commit = fx.call(&registry, CREATE_RESERVATION, booking_args(json!("true"))).await;
        assert!(commit.success);
        let stored = fx.catalog.reservations().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(commit.reservation_id.as_deref(), Some(stored[0].id.as_str()));
        assert_eq!(stored[0].total_price_cents, 36000);
        assert_eq!(stored[0].conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(fx.booking.step, BookingStep::Confirmed);
        assert_eq!(fx.booking.reservation_id, commit.reservation_id);

        // A repeated commit does not book twice.
        let again = fx.call(&registry, CREATE_RESERVATION, booking_args(json!(true))).await;
        assert_eq!(again.error, Some(ToolErrorCode::PreviewNotShown));
        assert_eq!(fx.catalog.reservations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_in_same_turn_as_preview_rejected() {
        let mut fx = Fixture::new();
        let registry = all_tools();
        fx.call(&registry, CREATE_RESERVATION, booking_args(json!(false))).await;

        let early = fx.call_in_turn(&registry, CREATE_RESERVATION, booking_args(json!(true))).await;
        assert_eq!(early.error, Some(ToolErrorCode::PreviewNotShown));
        assert!(early.data["message"].as_str().unwrap().contains("wait for their confirmation"));
        assert!(early.reservation_id.is_none());
        assert!(fx.catalog.reservations().unwrap().is_empty());
        assert_eq!(fx.booking.step, BookingStep::AwaitingConfirmation);

        // The guest answers; the same details now go through.
        let commit = fx.call(&registry, CREATE_RESERVATION, booking_args(json!(true))).await;
        assert!(commit.success);
        assert_eq!(fx.catalog.reservations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_with_changed_details_rejected() {
        let mut fx = Fixture::new();
        let registry = all_tools();
        fx.call(&registry, CREATE_RESERVATION, booking_args(json!(false))).await;

        let mut changed = booking_args(json!(true));
        changed["checkOut"] = json!("2024-06-14");
        let outcome = fx.call(&registry, CREATE_RESERVATION, changed).await;
        assert_eq!(outcome.error, Some(ToolErrorCode::PreviewNotShown));
        assert!(fx.catalog.reservations().unwrap().is_empty());
        // The preview is still pending.
        assert_eq!(fx.booking.step, BookingStep::AwaitingConfirmation);
    }

    #[tokio::test]
    async fn test_missing_fields_listed() {
        let mut fx = Fixture::new();
        let outcome = fx
            .call(
                &all_tools(),
                CREATE_RESERVATION,
                json!({"roomSlug": "limone", "checkIn": "2024-06-10", "checkOut": "2024-06-12", "confirm": false}),
            )
            .await;
        assert_eq!(outcome.error, Some(ToolErrorCode::MissingRequiredFields));
        assert_eq!(
            outcome.data["missingFields"],
            json!(["guestName", "guestEmail", "guestsCount"])
        );
    }

    #[tokio::test]
    async fn test_validation_order_and_state_untouched() {
        let mut fx = Fixture::new();
        let registry = all_tools();
        fx.call(&registry, CREATE_RESERVATION, booking_args(json!(false))).await;
        let before = fx.booking.clone();

        let mut unknown = booking_args(json!(true));
        unknown["roomSlug"] = json!("suite-imaginaria");
        assert_eq!(
            fx.call(&registry, CREATE_RESERVATION, unknown).await.error,
            Some(ToolErrorCode::RoomNotFound)
        );

        let mut crowd = booking_args(json!(true));
        crowd["guestsCount"] = json!(3);
        crowd["guestEmail"] = json!("not-an-email");
        assert_eq!(
            fx.call(&registry, CREATE_RESERVATION, crowd).await.error,
            Some(ToolErrorCode::CapacityExceeded)
        );

        let mut bad_email = booking_args(json!(true));
        bad_email["guestEmail"] = json!("anna@example");
        bad_email["checkIn"] = json!("2020-01-01");
        assert_eq!(
            fx.call(&registry, CREATE_RESERVATION, bad_email).await.error,
            Some(ToolErrorCode::InvalidEmail)
        );

        let mut past = booking_args(json!(true));
        past["checkIn"] = json!("2020-01-01");
        assert_eq!(
            fx.call(&registry, CREATE_RESERVATION, past).await.error,
            Some(ToolErrorCode::CheckInPast)
        );

        assert_eq!(fx.booking, before);
        assert!(fx.catalog.reservations().unwrap().is_empty());

        // The guest can still confirm the original preview.
        let commit = fx.call(&registry, CREATE_RESERVATION, booking_args(json!(true))).await;
        assert!(commit.success);
    }

    #[tokio::test]
    async fn test_creation_failure_reported() {
        let mut fx = Fixture::new();
        let registry = all_tools();
        fx.call(&registry, CREATE_RESERVATION, booking_args(json!(false))).await;
        // Someone else books the room between preview and confirmation.
        fx.catalog
            .add_reservation(Reservation {
                id: "other".to_string(),
                room_id: "r1".to_string(),
                guest_name: "Other".to_string(),
                guest_email: "o@example.com".to_string(),
                check_in: d("2024-06-11"),
                check_out: d("2024-06-13"),
                guests_count: 1,
                total_price_cents: 0,
                status: ReservationStatus::Pending,
                conversation_id: None,
            })
            .unwrap();
        let outcome = fx.call(&registry, CREATE_RESERVATION, booking_args(json!(true))).await;
        assert_eq!(outcome.error, Some(ToolErrorCode::CreationFailed));
        assert_eq!(fx.booking.step, BookingStep::AwaitingConfirmation);
    }

    #[test]
    fn test_confirm_normalization() {
        assert!(arg_bool(&json!({"confirm": true}), "confirm"));
        assert!(arg_bool(&json!({"confirm": "true"}), "confirm"));
        assert!(arg_bool(&json!({"confirm": "1"}), "confirm"));
        assert!(!arg_bool(&json!({"confirm": "yes"}), "confirm"));
        assert!(!arg_bool(&json!({"confirm": "false"}), "confirm"));
        assert!(!arg_bool(&json!({}), "confirm"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("anna@example.com"));
        assert!(is_valid_email("a.b+c@mail.villa.it"));
        assert!(!is_valid_email("anna@example"));
        assert!(!is_valid_email("anna example@x.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b@c.com"));
        assert!(!is_valid_email("anna@.com"));
    }
}
