//! Room catalog seeding from a TOML file.
//!
//! ```toml
//! [[rooms]]
//! slug = "limone"
//! name = "Camera Limone"
//! description = "Garden view, lemon grove below the window."
//! capacity = 2
//! price_per_night = 180.0
//! features = ["Garden view", "Air conditioning"]
//!
//! [[blocks]]
//! room = "limone"
//! dates = ["2024-08-15"]
//! ```
//!
//! Rooms are upserted by slug, so seeding is repeatable.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use concierge_core::models::Room;

use crate::sqlite_catalog::SqliteCatalog;

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub rooms: Vec<RoomSeed>,
    #[serde(default)]
    pub blocks: Vec<BlockSeed>,
}

#[derive(Debug, Deserialize)]
pub struct RoomSeed {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capacity: u32,
    /// Euros; stored as cents.
    pub price_per_night: f64,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct BlockSeed {
    pub room: String,
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub rooms: usize,
    pub blocked_dates: usize,
}

impl RoomSeed {
    fn to_room(&self) -> Result<Room> {
        if self.slug.trim().is_empty() {
            bail!("room slug must not be empty");
        }
        if self.capacity == 0 {
            bail!("room '{}' must have capacity >= 1", self.slug);
        }
        if !self.price_per_night.is_finite() || self.price_per_night <= 0.0 {
            bail!("room '{}' must have a positive price", self.slug);
        }
        Ok(Room {
            id: uuid::Uuid::new_v4().to_string(),
            slug: self.slug.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            capacity: self.capacity,
            price_per_night_cents: (self.price_per_night * 100.0).round() as i64,
            image_url: self.image_url.clone(),
            features: self.features.clone(),
            is_active: self.is_active,
            sort_order: self.sort_order,
        })
    }
}

pub fn parse_seed(content: &str) -> Result<SeedFile> {
    toml::from_str(content).context("Failed to parse room seed file")
}

pub async fn seed_rooms(catalog: &SqliteCatalog, path: &Path) -> Result<SeedReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
    apply_seed(catalog, &parse_seed(&content)?).await
}

pub async fn apply_seed(catalog: &SqliteCatalog, seed: &SeedFile) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let mut ids = std::collections::HashMap::new();

    for room in &seed.rooms {
        let id = catalog.upsert_room(&room.to_room()?).await?;
        ids.insert(room.slug.clone(), id);
        report.rooms += 1;
    }

    for block in &seed.blocks {
        let Some(room_id) = ids.get(&block.room) else {
            bail!("blocked dates reference unknown room '{}'", block.room);
        };
        for date in &block.dates {
            catalog.block_date(room_id, *date).await?;
            report.blocked_dates += 1;
        }
    }

    info!(rooms = report.rooms, blocked = report.blocked_dates, "room catalog seeded");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_converts_price() {
        let seed = parse_seed(
            r#"
            [[rooms]]
            slug = "limone"
            name = "Camera Limone"
            capacity = 2
            price_per_night = 180.5
            "#,
        )
        .unwrap();
        let room = seed.rooms[0].to_room().unwrap();
        assert_eq!(room.price_per_night_cents, 18050);
        assert!(room.is_active);
        assert!(seed.blocks.is_empty());
    }

    #[test]
    fn test_invalid_rooms_rejected() {
        let seed = parse_seed(
            r#"
            [[rooms]]
            slug = "empty"
            name = "No beds"
            capacity = 0
            price_per_night = 100.0
            "#,
        )
        .unwrap();
        assert!(seed.rooms[0].to_room().is_err());
    }
}
