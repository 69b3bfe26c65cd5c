//! SQLite-backed [`RoomCatalog`].
//!
//! Dates are stored as `YYYY-MM-DD` text, so the overlap and blocked-date
//! checks are plain string comparisons in SQL.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use concierge_core::catalog::RoomCatalog;
use concierge_core::models::{NewReservation, Reservation, ReservationStatus, Room};

const ROOM_COLUMNS: &str = "r.id, r.slug, r.name, r.description, r.capacity, r.price_cents, \
                            r.image_url, r.features_json, r.is_active, r.sort_order";

const RESERVATION_COLUMNS: &str = "id, room_id, guest_name, guest_email, check_in, check_out, \
                                   guests_count, total_price_cents, status, conversation_id";

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a room, or update the existing room with the same slug.
    /// Returns the stored room id.
    pub async fn upsert_room(&self, room: &Room) -> Result<String> {
        let features = serde_json::to_string(&room.features)?;
        sqlx::query(
            r#"
            INSERT INTO rooms (id, slug, name, description, capacity, price_cents,
                               image_url, features_json, is_active, sort_order)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                capacity = excluded.capacity,
                price_cents = excluded.price_cents,
                image_url = excluded.image_url,
                features_json = excluded.features_json,
                is_active = excluded.is_active,
                sort_order = excluded.sort_order
            "#,
        )
        .bind(&room.id)
        .bind(&room.slug)
        .bind(&room.name)
        .bind(&room.description)
        .bind(room.capacity as i64)
        .bind(room.price_per_night_cents)
        .bind(&room.image_url)
        .bind(&features)
        .bind(room.is_active)
        .bind(room.sort_order as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert room {}", room.slug))?;

        let id: String = sqlx::query_scalar("SELECT id FROM rooms WHERE slug = ?")
            .bind(&room.slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Mark one night of a room as unavailable.
    pub async fn block_date(&self, room_id: &str, date: NaiveDate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO room_blocks (room_id, date, is_blocked) VALUES (?, ?, 1)
            ON CONFLICT(room_id, date) DO UPDATE SET is_blocked = 1
            "#,
        )
        .bind(room_id)
        .bind(date.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All reservations, oldest first.
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reservations ORDER BY rowid ASC",
            RESERVATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reservation_from_row).collect()
    }

    pub async fn set_reservation_status(&self, id: &str, status: ReservationStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE reservations SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn room_from_row(row: &SqliteRow) -> Room {
    let features_json: String = row.get("features_json");
    let capacity: i64 = row.get("capacity");
    let sort_order: i64 = row.get("sort_order");
    Room {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        description: row.get("description"),
        capacity: u32::try_from(capacity).unwrap_or(0),
        price_per_night_cents: row.get("price_cents"),
        image_url: row.get("image_url"),
        features: serde_json::from_str(&features_json).unwrap_or_default(),
        is_active: row.get("is_active"),
        sort_order: i32::try_from(sort_order).unwrap_or(i32::MAX),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    raw.parse()
        .with_context(|| format!("Invalid stored date: '{}'", raw))
}

fn reservation_from_row(row: &SqliteRow) -> Result<Reservation> {
    let check_in: String = row.get("check_in");
    let check_out: String = row.get("check_out");
    let status: String = row.get("status");
    let guests: i64 = row.get("guests_count");
    Ok(Reservation {
        id: row.get("id"),
        room_id: row.get("room_id"),
        guest_name: row.get("guest_name"),
        guest_email: row.get("guest_email"),
        check_in: parse_date(&check_in)?,
        check_out: parse_date(&check_out)?,
        guests_count: u32::try_from(guests).context("Invalid stored guest count")?,
        total_price_cents: row.get("total_price_cents"),
        status: status.parse()?,
        conversation_id: row.get("conversation_id"),
    })
}

#[async_trait]
impl RoomCatalog for SqliteCatalog {
    async fn active_rooms(&self) -> Result<Vec<Room>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM rooms r WHERE r.is_active = 1 ORDER BY r.sort_order ASC, r.name ASC",
            ROOM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load rooms")?;
        Ok(rows.iter().map(room_from_row).collect())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Room>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM rooms r WHERE r.slug = ? AND r.is_active = 1",
            ROOM_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(room_from_row))
    }

    async fn find_available(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
    ) -> Result<Vec<Room>> {
        let check_in = check_in.to_string();
        let check_out = check_out.to_string();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM rooms r
            WHERE r.is_active = 1
              AND r.capacity >= ?
              AND NOT EXISTS (
                  SELECT 1 FROM reservations x
                  WHERE x.room_id = r.id
                    AND x.status != 'cancelled'
                    AND x.check_in < ?
                    AND x.check_out > ?
              )
              AND NOT EXISTS (
                  SELECT 1 FROM room_blocks b
                  WHERE b.room_id = r.id
                    AND b.is_blocked = 1
                    AND b.date >= ?
                    AND b.date < ?
              )
            ORDER BY r.sort_order ASC, r.name ASC
            "#,
            ROOM_COLUMNS
        ))
        .bind(guests as i64)
        .bind(&check_out)
        .bind(&check_in)
        .bind(&check_in)
        .bind(&check_out)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query room availability")?;
        Ok(rows.iter().map(room_from_row).collect())
    }

    async fn create_reservation(&self, reservation: &NewReservation) -> Result<Reservation> {
        reservation.validate()?;
        let check_in = reservation.check_in.to_string();
        let check_out = reservation.check_out.to_string();

        let mut tx = self.pool.begin().await?;

        let room_exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM rooms WHERE id = ?")
            .bind(&reservation.room_id)
            .fetch_one(&mut *tx)
            .await?;
        if !room_exists {
            bail!("room not found: {}", reservation.room_id);
        }

        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) > 0 FROM reservations
            WHERE room_id = ? AND status != 'cancelled' AND check_in < ? AND check_out > ?
            "#,
        )
        .bind(&reservation.room_id)
        .bind(&check_out)
        .bind(&check_in)
        .fetch_one(&mut *tx)
        .await?;
        if taken {
            bail!("room is no longer available for these dates");
        }

        let blocked: bool = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) > 0 FROM room_blocks
            WHERE room_id = ? AND is_blocked = 1 AND date >= ? AND date < ?
            "#,
        )
        .bind(&reservation.room_id)
        .bind(&check_in)
        .bind(&check_out)
        .fetch_one(&mut *tx)
        .await?;
        if blocked {
            bail!("room is no longer available for these dates");
        }

        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO reservations (id, room_id, guest_name, guest_email, check_in, check_out,
                                      guests_count, total_price_cents, status, conversation_id,
                                      created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&reservation.room_id)
        .bind(&reservation.guest_name)
        .bind(&reservation.guest_email)
        .bind(&check_in)
        .bind(&check_out)
        .bind(reservation.guests_count as i64)
        .bind(reservation.total_price_cents)
        .bind(ReservationStatus::Pending.as_str())
        .bind(&reservation.conversation_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .context("Failed to insert reservation")?;

        tx.commit().await?;

        Ok(Reservation {
            id,
            room_id: reservation.room_id.clone(),
            guest_name: reservation.guest_name.clone(),
            guest_email: reservation.guest_email.clone(),
            check_in: reservation.check_in,
            check_out: reservation.check_out,
            guests_count: reservation.guests_count,
            total_price_cents: reservation.total_price_cents,
            status: ReservationStatus::Pending,
            conversation_id: reservation.conversation_id.clone(),
        })
    }
}
