//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over every stored chunk.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Document, NewChunk, ScoredChunk, StoredChunk};

use super::{rank_by_similarity, SearchOptions, Store};

struct ChunkRow {
    chunk: StoredChunk,
    vector: Vec<f32>,
}

/// In-memory knowledge base.
pub struct InMemoryStore {
    docs: RwLock<Vec<Document>>,
    chunks: RwLock<Vec<ChunkRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored chunks, across all documents.
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<String> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc.clone(),
            None => docs.push(doc.clone()),
        }
        Ok(doc.id.clone())
    }

    async fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.iter().find(|d| d.content_hash == content_hash).cloned())
    }

    async fn find_document_by_name(&self, name: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.iter().find(|d| d.name == name).cloned())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut docs = self.docs.write().map_err(poisoned)?;
            let before = docs.len();
            docs.retain(|d| d.id != id);
            docs.len() != before
        };
        if removed {
            self.delete_by_document(id).await?;
        }
        Ok(removed)
    }

    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        chunks.push(ChunkRow {
            chunk: StoredChunk {
                id: id.clone(),
                document_id: chunk.document_id.clone(),
                chunk_index: chunk.chunk_index,
                content: chunk.content.clone(),
                context_before: chunk.context_before.clone(),
                context_after: chunk.context_after.clone(),
                source_name: chunk.source_name.clone(),
            },
            vector: chunk.embedding.clone(),
        });
        Ok(id)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        let before = chunks.len();
        chunks.retain(|row| row.chunk.document_id != document_id);
        Ok((before - chunks.len()) as u64)
    }

    async fn search(&self, query_vec: &[f32], options: &SearchOptions) -> Result<Vec<ScoredChunk>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let hits = chunks
            .iter()
            .map(|row| ScoredChunk {
                chunk: row.chunk.clone(),
                similarity: cosine_similarity(query_vec, &row.vector),
            })
            .collect();
        Ok(rank_by_similarity(hits, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, hash: &str) -> Document {
        Document {
            id: id.to_string(),
            name: format!("{}.md", id),
            doc_type: "md".to_string(),
            source_url: None,
            content_hash: hash.to_string(),
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
        }
    }

    fn chunk(doc_id: &str, index: i64, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            document_id: doc_id.to_string(),
            chunk_index: index,
            content: format!("chunk {} of {}", index, doc_id),
            context_before: None,
            context_after: None,
            source_name: format!("{}.md", doc_id),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_search_ordering_and_threshold() {
        let store = InMemoryStore::new();
        store.insert_chunk(&chunk("d1", 0, vec![1.0, 0.0])).await.unwrap();
        store.insert_chunk(&chunk("d1", 1, vec![0.7, 0.7])).await.unwrap();
        store.insert_chunk(&chunk("d1", 2, vec![0.0, 1.0])).await.unwrap();
        store.insert_chunk(&chunk("d1", 3, vec![-1.0, 0.0])).await.unwrap();

        let hits = store
            .search(&[1.0, 0.0], &SearchOptions { limit: 10, threshold: 0.0 })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_index, 0);
        assert_eq!(hits[1].chunk.chunk_index, 1);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!(hits.iter().all(|h| h.similarity > 0.0));
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let store = InMemoryStore::new();
        store
            .insert_many(&[chunk("d1", 0, vec![1.0]), chunk("d1", 1, vec![1.0]), chunk("d2", 0, vec![1.0])])
            .await
            .unwrap();
        assert_eq!(store.delete_by_document("d1").await.unwrap(), 2);
        assert_eq!(store.chunk_count(), 1);
        assert_eq!(store.delete_by_document("d1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_document_lookup_and_delete() {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("d1", "h1")).await.unwrap();
        store.insert_chunk(&chunk("d1", 0, vec![1.0])).await.unwrap();

        assert_eq!(store.find_document_by_hash("h1").await.unwrap().unwrap().id, "d1");
        assert!(store.find_document_by_hash("h2").await.unwrap().is_none());
        assert_eq!(store.find_document_by_name("d1.md").await.unwrap().unwrap().id, "d1");

        assert!(store.delete_document("d1").await.unwrap());
        assert!(!store.delete_document("d1").await.unwrap());
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_replace_chunks() {
        let store = InMemoryStore::new();
        store.insert_chunk(&chunk("d1", 0, vec![1.0])).await.unwrap();
        let ids = store
            .replace_chunks("d1", &[chunk("d1", 0, vec![1.0]), chunk("d1", 1, vec![1.0])])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.chunk_count(), 2);
    }
}
