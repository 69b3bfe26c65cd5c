//! # Villa Concierge
//!
//! The application layer of the hotel concierge: SQLite persistence,
//! OpenAI-compatible providers, knowledge ingestion, the dialogue
//! orchestrator and its HTTP and CLI surfaces. Pure logic (chunking,
//! retrieval, tools, booking state) lives in `concierge_core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │  Knowledge  │──▶│ Chunk+Embed │──▶│  SQLite   │
//! │    files    │   │             │   │  vectors  │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │ retrieve
//!                                          ▼
//!   guest ──▶ HTTP / CLI ──▶ Orchestrator ──▶ chat model
//!                               │  ▲
//!                          tool │  │ result
//!                               ▼  │
//!                        availability / reservation
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Documents and chunk vectors |
//! | [`sqlite_catalog`] | Rooms, blocked dates, reservations |
//! | [`sqlite_conversations`] | Conversations and transcripts |
//! | [`http`] | Shared retry/backoff HTTP client |
//! | [`embedding`] | Embedding providers |
//! | [`chat`] | Chat-completion providers |
//! | [`ingest`] | Knowledge ingestion |
//! | [`seed`] | Room catalog seeding |
//! | [`dialogue`] | Turn orchestration |
//! | [`app`] | Wiring |
//! | [`server`] | HTTP server |

pub mod app;
pub mod chat;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod embedding;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod seed;
pub mod server;
pub mod sqlite_catalog;
pub mod sqlite_conversations;
pub mod sqlite_store;
