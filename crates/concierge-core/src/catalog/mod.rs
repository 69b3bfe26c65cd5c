//! Room and reservation catalog.
//!
//! The dialogue layer reads rooms and writes reservations only through
//! [`RoomCatalog`]. Availability follows half-open night ranges: a stay
//! `[check_in, check_out)` occupies the nights from `check_in` up to but
//! not including `check_out`, so back-to-back stays do not conflict.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{NewReservation, Reservation, Room};

#[async_trait]
pub trait RoomCatalog: Send + Sync {
    /// All active rooms, ordered by `sort_order`.
    async fn active_rooms(&self) -> Result<Vec<Room>>;

    /// An active room by slug.
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Room>>;

    /// Active rooms that fit `guests` and are free for every night of
    /// `[check_in, check_out)`: no overlapping non-cancelled reservation
    /// and no blocked date. Ordered by `sort_order`.
    async fn find_available(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
    ) -> Result<Vec<Room>>;

    /// Persist a reservation with status `pending`.
    ///
    /// Fails when the input is invalid, the room is unknown, or the room
    /// was taken for an overlapping stay in the meantime.
    async fn create_reservation(&self, reservation: &NewReservation) -> Result<Reservation>;
}

/// Whether two half-open stays share at least one night.
pub fn overlaps(
    existing_in: NaiveDate,
    existing_out: NaiveDate,
    requested_in: NaiveDate,
    requested_out: NaiveDate,
) -> bool {
    existing_in < requested_out && existing_out > requested_in
}
