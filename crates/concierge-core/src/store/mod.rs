//! Vector similarity store abstraction.
//!
//! The [`Store`] trait covers everything the ingestion and retrieval
//! pipelines need from the knowledge base: documents, their chunks with
//! embedding vectors, and nearest-neighbour search by cosine similarity.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! [`memory::InMemoryStore`] backs the tests; the app crate ships a
//! SQLite implementation.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, NewChunk, ScoredChunk};

/// Parameters for [`Store::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Maximum number of hits.
    pub limit: usize,
    /// Only hits with similarity strictly greater than this are returned.
    pub threshold: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.35,
        }
    }
}

/// Storage backend for the knowledge base.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or update a document |
/// | [`find_document_by_hash`](Store::find_document_by_hash) | Dedup lookup by content hash |
/// | [`find_document_by_name`](Store::find_document_by_name) | Lookup by source name |
/// | [`delete_document`](Store::delete_document) | Remove a document and its chunks |
/// | [`insert_chunk`](Store::insert_chunk) | Store one chunk with its vector |
/// | [`insert_many`](Store::insert_many) | Store a batch of chunks |
/// | [`delete_by_document`](Store::delete_by_document) | Drop every chunk of a document |
/// | [`replace_chunks`](Store::replace_chunks) | Swap a document's chunks for new ones |
/// | [`search`](Store::search) | Cosine similarity search |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a document. Returns its id.
    async fn upsert_document(&self, doc: &Document) -> Result<String>;

    async fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>>;

    async fn find_document_by_name(&self, name: &str) -> Result<Option<Document>>;

    /// Delete a document and all of its chunks. Returns `false` when no
    /// such document exists.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Insert one chunk. Returns the generated chunk id.
    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<String>;

    /// Insert a batch of chunks, preserving order. Returns their ids.
    async fn insert_many(&self, chunks: &[NewChunk]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            ids.push(self.insert_chunk(chunk).await?);
        }
        Ok(ids)
    }

    /// Delete every chunk of a document. Returns how many were removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<u64>;

    /// Replace a document's chunks.
    ///
    /// Backends with transactions should override this so readers never
    /// observe a document with no chunks.
    async fn replace_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<String>> {
        self.delete_by_document(document_id).await?;
        self.insert_many(chunks).await
    }

    /// Nearest chunks to `query_vec`.
    ///
    /// Results have similarity `> options.threshold`, are sorted by
    /// similarity descending with ties in insertion order, and hold at
    /// most `options.limit` entries.
    async fn search(&self, query_vec: &[f32], options: &SearchOptions) -> Result<Vec<ScoredChunk>>;
}

/// Filter, order and truncate scored hits given in insertion order.
///
/// Shared by every backend so they agree on the threshold comparison and
/// the tie-break.
pub fn rank_by_similarity(hits: Vec<ScoredChunk>, options: &SearchOptions) -> Vec<ScoredChunk> {
    let mut hits: Vec<ScoredChunk> = hits
        .into_iter()
        .filter(|h| h.similarity > options.threshold)
        .collect();
    // Stable sort: equal similarities keep insertion order.
    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    hits.truncate(options.limit);
    hits
}
