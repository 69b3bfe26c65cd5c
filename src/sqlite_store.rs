//! SQLite-backed [`Store`] implementation.
//!
//! Documents and chunks live in the `documents` / `chunks` tables; chunk
//! vectors are stored inline as little-endian f32 BLOBs. Search is a
//! brute-force cosine scan, which is plenty for a hotel-sized knowledge
//! base.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use concierge_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use concierge_core::models::{Document, NewChunk, ScoredChunk, StoredChunk};
use concierge_core::store::{rank_by_similarity, SearchOptions, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every document, newest first.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, name, doc_type, source_url, content_hash, created_at, updated_at \
             FROM documents ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    pub async fn chunk_count(&self, document_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        name: row.get("name"),
        doc_type: row.get("doc_type"),
        source_url: row.get("source_url"),
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn insert_chunk_tx(tx: &mut Transaction<'_, Sqlite>, chunk: &NewChunk) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO chunks (id, document_id, chunk_index, content, context_before,
                            context_after, source_name, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&chunk.document_id)
    .bind(chunk.chunk_index)
    .bind(&chunk.content)
    .bind(&chunk.context_before)
    .bind(&chunk.context_after)
    .bind(&chunk.source_name)
    .bind(vec_to_blob(&chunk.embedding))
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut **tx)
    .await
    .with_context(|| {
        format!(
            "Failed to insert chunk {} of document {}",
            chunk.chunk_index, chunk.document_id
        )
    })?;
    Ok(id)
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<String> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, name, doc_type, source_url, content_hash,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                doc_type = excluded.doc_type,
                source_url = excluded.source_url,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.name)
        .bind(&doc.doc_type)
        .bind(&doc.source_url)
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert document {}", doc.name))?;

        Ok(doc.id.clone())
    }

    async fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, name, doc_type, source_url, content_hash, created_at, updated_at \
             FROM documents WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn find_document_by_name(&self, name: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, name, doc_type, source_url, content_hash, created_at, updated_at \
             FROM documents WHERE name = ? ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<String> {
        let mut tx = self.pool.begin().await?;
        let id = insert_chunk_tx(&mut tx, chunk).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn insert_many(&self, chunks: &[NewChunk]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            ids.push(insert_chunk_tx(&mut tx, chunk).await?);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            ids.push(insert_chunk_tx(&mut tx, chunk).await?);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn search(&self, query_vec: &[f32], options: &SearchOptions) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, content, context_before,
                   context_after, source_name, embedding
            FROM chunks
            ORDER BY rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let hits: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob));
                ScoredChunk {
                    chunk: StoredChunk {
                        id: row.get("id"),
                        document_id: row.get("document_id"),
                        chunk_index: row.get("chunk_index"),
                        content: row.get("content"),
                        context_before: row.get("context_before"),
                        context_after: row.get("context_after"),
                        source_name: row.get("source_name"),
                    },
                    similarity,
                }
            })
            .collect();

        Ok(rank_by_similarity(hits, options))
    }
}
