//! # Concierge Core
//!
//! Runtime-agnostic logic for the Villa Limone concierge: data models,
//! chunking, the vector store abstraction, lexical re-ranking, the
//! retrieval pipeline, the booking state machine and the tool catalog
//! the language model acts through.
//!
//! This crate contains no tokio runtime, sqlx, or HTTP client code.
//! Storage, the chat model and the embedding model are reached through
//! the traits defined here; the `villa-concierge` app crate provides the
//! SQLite and OpenAI-compatible implementations.

pub mod booking;
pub mod catalog;
pub mod chat;
pub mod chunk;
pub mod clock;
pub mod context;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod search;
pub mod store;
pub mod tools;
