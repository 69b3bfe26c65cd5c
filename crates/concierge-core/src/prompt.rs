//! System prompt rendering.
//!
//! The operator may store a template; without one, [`DEFAULT_TEMPLATE`]
//! is used. Supported variables:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `${context.currentDate}` | server date, `YYYY-MM-DD` |
//! | `${context.tomorrow}` | server date + 1 day |
//! | `${context.availableRooms}` | formatted active room list |
//! | `${context.bookingState}` | booking state as pretty JSON |
//! | `${context.hotelName}` | configured hotel name |
//!
//! The feature-availability banner is always appended after the
//! template, and the knowledge block only when retrieval found
//! something.

use crate::context::ConversationContext;
use crate::models::Room;
use crate::tools::FeatureFlags;

const RULE: &str = "═══════════════════════════════════════════════════════════";

pub const DEFAULT_TEMPLATE: &str = r#"You are the concierge of ${context.hotelName}, a small boutique hotel. You help guests with questions about the hotel, its rooms and the surroundings, and you help them book a stay.

GUIDELINES:
- Be warm, concise and precise. Answer in the language the guest writes in.
- Only state facts that come from this prompt, the knowledge base context or function results. If you do not know, say so and suggest contacting the hotel.
- Never invent rooms, prices, availability or reservation numbers.

CURRENT DATE: ${context.currentDate}
TOMORROW: ${context.tomorrow}
Resolve relative dates ("tomorrow", "next weekend", "for three nights") from CURRENT DATE. Always pass dates to functions as YYYY-MM-DD.

AVAILABLE ROOMS:
${context.availableRooms}

CURRENT BOOKING STATE:
${context.bookingState}

FUNCTION CALLING RULES:
1. Every reply must be a function call. Talk to the guest only through respond.
2. When the guest wants to stay and the dates are known, call check_availability. If dates are missing, ask for them with respond.
3. Before booking, collect the room, dates, number of guests, full name and email. Ask for whatever is missing with respond.
4. Booking has two phases. First call create_reservation with confirm=false and show the preview to the guest with respond, asking them to confirm.
5. Only after the guest explicitly agrees to that preview, call create_reservation with confirm=true and the same details.
6. After any function result, explain it to the guest with respond. When a reservation is created, give the exact reservationId from the result.

RESPONSE STYLE:
- Short paragraphs, prices in euros, dates written out clearly.
- Offer the next step (check dates, choose a room, confirm) at the end of a reply."#;

/// Render the system prompt for one turn.
///
/// An absent or blank `template` falls back to [`DEFAULT_TEMPLATE`].
pub fn render_system_prompt(
    template: Option<&str>,
    ctx: &ConversationContext,
    flags: &FeatureFlags,
    hotel_name: &str,
) -> String {
    let template = template
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TEMPLATE);

    let booking_state =
        serde_json::to_string_pretty(&ctx.booking).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = template
        .replace("${context.currentDate}", &ctx.current_date.to_string())
        .replace("${context.tomorrow}", &ctx.tomorrow.to_string())
        .replace("${context.availableRooms}", &format_rooms(&ctx.rooms))
        .replace("${context.bookingState}", &booking_state)
        .replace("${context.hotelName}", hotel_name);

    prompt.push_str(&feature_banner(flags));

    if !ctx.knowledge.trim().is_empty() {
        prompt.push_str("\n\n## Knowledge Base Context\n\n");
        prompt.push_str("Use the following information to answer the guest's question:\n\n");
        prompt.push_str(&ctx.knowledge);
        prompt.push_str(
            "\n\n---\n\nRemember: only use information from the context above. Do not make up information.",
        );
    }

    prompt
}

/// One block per room, in catalog order.
pub fn format_rooms(rooms: &[Room]) -> String {
    if rooms.is_empty() {
        return "No rooms are currently listed.".to_string();
    }
    rooms
        .iter()
        .map(|room| {
            let features = if room.features.is_empty() {
                "-".to_string()
            } else {
                room.features.join(", ")
            };
            format!(
                "\n{} (slug: \"{}\")\n- {}\n- Price: €{}/night\n- Max guests: {}\n- Features: {}\n",
                room.name,
                room.slug,
                room.description,
                format_euros(room.price_per_night_cents),
                room.capacity,
                features
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `18000` → `"180"`, `18050` → `"180.50"`.
fn format_euros(cents: i64) -> String {
    if cents % 100 == 0 {
        format!("{}", cents / 100)
    } else {
        format!("{:.2}", cents as f64 / 100.0)
    }
}

fn feature_banner(flags: &FeatureFlags) -> String {
    let mut out = format!("\n\n{}\nFEATURE AVAILABILITY\n{}\n", RULE, RULE);

    if flags.enable_booking {
        out.push_str("✓ Online booking: Available\n");
    } else {
        out.push_str(
            "\n⚠️ ONLINE BOOKING IS CURRENTLY DISABLED\n\
             - create_reservation is not available. Do not collect booking details.\n\
             - If the guest wants to book, explain that online booking is paused and \
             suggest contacting the hotel directly by phone or email.\n",
        );
    }

    if flags.enable_availability {
        out.push_str("✓ Availability checking: Available\n");
    } else {
        out.push_str(
            "\n⚠️ AVAILABILITY CHECKING IS CURRENTLY DISABLED\n\
             - check_availability is not available. Do not guess which rooms are free.\n\
             - Suggest contacting the hotel directly for availability.\n",
        );
    }

    if !flags.enable_recommendations {
        out.push_str(
            "\n⚠️ LOCAL RECOMMENDATIONS ARE TURNED OFF\n\
             - Do not recommend restaurants, activities or attractions; keep to hotel information.\n",
        );
    }

    out.push_str(RULE);
    out
}
