//! Server-side booking funnel.
//!
//! ```text
//! idle ──check_availability──▶ checking_availability ──preview──▶ awaiting_confirmation
//!   ▲                                  ▲                                   │
//!   │                                  └──────check_availability───────────┤
//!   └──────── check_availability after confirmed (fresh booking) ◀── confirmed ◀─ commit
//! ```
//!
//! The transition functions on [`BookingState`] are the only way the
//! dialogue layer moves a conversation through the funnel. A commit is
//! authorized only when a preview was recorded for exactly the same
//! room, dates, party size and email, in an earlier guest turn than the
//! commit. Nothing the model says can move the state forward on its own.
//!
//! Turns are identified by the conversation's message count once the
//! guest message is stored, which grows with every guest message.
//!
//! `collecting_info` is accepted when reading stored state but never
//! produced. Which fields are still missing is visible from the state
//! itself, and for the guards it behaves like `checking_availability`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tools::ToolErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    #[default]
    Idle,
    CheckingAvailability,
    CollectingInfo,
    AwaitingConfirmation,
    Confirmed,
}

impl BookingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStep::Idle => "idle",
            BookingStep::CheckingAvailability => "checking_availability",
            BookingStep::CollectingInfo => "collecting_info",
            BookingStep::AwaitingConfirmation => "awaiting_confirmation",
            BookingStep::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for BookingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bookable room in an availability answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableRoom {
    pub slug: String,
    pub name: String,
    pub capacity: u32,
    /// Euros.
    pub price_per_night: f64,
    /// Euros, `price_per_night × nights`.
    pub total_price: f64,
    #[serde(default)]
    pub features: Vec<String>,
}

/// The last availability answer given in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySnapshot {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub nights: i64,
    pub available: Vec<AvailableRoom>,
    /// Slugs of active rooms that are not available for the request.
    #[serde(default)]
    pub unavailable: Vec<String>,
    pub has_rooms: bool,
}

/// The booking details a preview shows and a commit must repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingQuote {
    pub room_slug: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub guest_name: String,
    pub guest_email: String,
}

/// Booking progress for one conversation.
///
/// Stored as JSON (camelCase keys) under `bookingState` in the
/// conversation metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingState {
    pub step: BookingStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_in: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_out: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guests: Option<u32>,
    /// Room slug.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_result: Option<AvailabilitySnapshot>,
    pub preview_shown: bool,
    /// Guest turn in which the preview was shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_turn: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
}

/// An illegal booking transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("the reservation preview has not been shown to the guest")]
    PreviewNotShown,
    #[error("cannot confirm a reservation from step '{0}'")]
    InvalidState(BookingStep),
    #[error("reservation details differ from the preview shown to the guest")]
    DetailsChanged,
    #[error("the guest has not answered the reservation preview yet")]
    AwaitingGuestReply,
}

impl BookingError {
    /// The tool error code reported back to the model.
    pub fn code(&self) -> ToolErrorCode {
        match self {
            BookingError::PreviewNotShown
            | BookingError::DetailsChanged
            | BookingError::AwaitingGuestReply => ToolErrorCode::PreviewNotShown,
            BookingError::InvalidState(_) => ToolErrorCode::InvalidState,
        }
    }
}

impl BookingState {
    /// A validated availability check. Starts a fresh booking when the
    /// previous one was already confirmed.
    pub fn record_availability(&mut self, snapshot: AvailabilitySnapshot) {
        if self.step == BookingStep::Confirmed {
            *self = BookingState::default();
        }
        self.step = BookingStep::CheckingAvailability;
        self.check_in = Some(snapshot.check_in);
        self.check_out = Some(snapshot.check_out);
        self.guests = Some(snapshot.guests);
        self.preview_shown = false;
        self.preview_turn = None;
        self.availability_result = Some(snapshot);
    }

    /// Phase 1: a quote was shown to the guest during `turn`. No
    /// reservation exists yet.
    pub fn record_preview(&mut self, quote: &BookingQuote, turn: i64) {
        if self.step == BookingStep::Confirmed {
            *self = BookingState::default();
        }
        self.step = BookingStep::AwaitingConfirmation;
        self.check_in = Some(quote.check_in);
        self.check_out = Some(quote.check_out);
        self.guests = Some(quote.guests);
        self.selected_room = Some(quote.room_slug.clone());
        self.guest_name = Some(quote.guest_name.clone());
        self.guest_email = Some(quote.guest_email.clone());
        self.preview_shown = true;
        self.preview_turn = Some(turn);
    }

    /// Phase 2 guard for a commit attempted during `turn`. Checks, in
    /// order: a preview was shown, the funnel is awaiting confirmation,
    /// the guest has replied since the preview, and `quote` matches it.
    pub fn authorize_commit(&self, quote: &BookingQuote, turn: i64) -> Result<(), BookingError> {
        if !self.preview_shown {
            return Err(BookingError::PreviewNotShown);
        }
        if self.step != BookingStep::AwaitingConfirmation {
            return Err(BookingError::InvalidState(self.step));
        }
        if self.preview_turn.is_some_and(|shown| shown >= turn) {
            return Err(BookingError::AwaitingGuestReply);
        }
        if !self.matches_preview(quote) {
            return Err(BookingError::DetailsChanged);
        }
        Ok(())
    }

    /// Phase 2 completed: the reservation row exists with `reservation_id`.
    pub fn record_commit(
        &mut self,
        quote: &BookingQuote,
        reservation_id: &str,
        turn: i64,
    ) -> Result<(), BookingError> {
        self.authorize_commit(quote, turn)?;
        self.step = BookingStep::Confirmed;
        self.preview_shown = false;
        self.preview_turn = None;
        self.reservation_id = Some(reservation_id.to_string());
        Ok(())
    }

    fn matches_preview(&self, quote: &BookingQuote) -> bool {
        let same_email = self
            .guest_email
            .as_deref()
            .map(|e| e.trim().eq_ignore_ascii_case(quote.guest_email.trim()))
            .unwrap_or(false);
        self.selected_room.as_deref() == Some(quote.room_slug.as_str())
            && self.check_in == Some(quote.check_in)
            && self.check_out == Some(quote.check_out)
            && self.guests == Some(quote.guests)
            && same_email
    }
}
