//! In-memory [`RoomCatalog`] for tests.

use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{NewReservation, Reservation, ReservationStatus, Room};

use super::{overlaps, RoomCatalog};

#[derive(Default)]
struct Inner {
    rooms: Vec<Room>,
    blocked: Vec<(String, NaiveDate)>,
    reservations: Vec<Reservation>,
}

/// Rooms, blocked dates and reservations held in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    inner: RwLock<Inner>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory catalog lock poisoned")
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room(&self, room: Room) -> Result<()> {
        self.inner.write().map_err(poisoned)?.rooms.push(room);
        Ok(())
    }

    /// Mark one night of a room as unavailable.
    pub fn block_date(&self, room_id: &str, date: NaiveDate) -> Result<()> {
        self.inner
            .write()
            .map_err(poisoned)?
            .blocked
            .push((room_id.to_string(), date));
        Ok(())
    }

    /// Insert an existing reservation as-is, bypassing validation.
    pub fn add_reservation(&self, reservation: Reservation) -> Result<()> {
        self.inner
            .write()
            .map_err(poisoned)?
            .reservations
            .push(reservation);
        Ok(())
    }

    pub fn reservations(&self) -> Result<Vec<Reservation>> {
        Ok(self.inner.read().map_err(poisoned)?.reservations.clone())
    }
}

impl Inner {
    fn is_free(&self, room_id: &str, check_in: NaiveDate, check_out: NaiveDate) -> bool {
        let booked = self.reservations.iter().any(|r| {
            r.room_id == room_id
                && r.status != ReservationStatus::Cancelled
                && overlaps(r.check_in, r.check_out, check_in, check_out)
        });
        let blocked = self
            .blocked
            .iter()
            .any(|(id, date)| id == room_id && *date >= check_in && *date < check_out);
        !booked && !blocked
    }

    fn active_sorted(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().filter(|r| r.is_active).cloned().collect();
        rooms.sort_by_key(|r| r.sort_order);
        rooms
    }
}

#[async_trait]
impl RoomCatalog for InMemoryCatalog {
    async fn active_rooms(&self) -> Result<Vec<Room>> {
        Ok(self.inner.read().map_err(poisoned)?.active_sorted())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Room>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .rooms
            .iter()
            .find(|r| r.is_active && r.slug == slug)
            .cloned())
    }

    async fn find_available(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
    ) -> Result<Vec<Room>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .active_sorted()
            .into_iter()
            .filter(|r| r.can_accommodate(guests) && inner.is_free(&r.id, check_in, check_out))
            .collect())
    }

    async fn create_reservation(&self, reservation: &NewReservation) -> Result<Reservation> {
        reservation.validate()?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        if !inner.rooms.iter().any(|r| r.id == reservation.room_id) {
            bail!("room not found: {}", reservation.room_id);
        }
        if !inner.is_free(&reservation.room_id, reservation.check_in, reservation.check_out) {
            bail!("room is no longer available for these dates");
        }
        let created = Reservation {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: reservation.room_id.clone(),
            guest_name: reservation.guest_name.clone(),
            guest_email: reservation.guest_email.clone(),
            check_in: reservation.check_in,
            check_out: reservation.check_out,
            guests_count: reservation.guests_count,
            total_price_cents: reservation.total_price_cents,
            status: ReservationStatus::Pending,
            conversation_id: reservation.conversation_id.clone(),
        };
        inner.reservations.push(created.clone());
        Ok(created)
    }
}
