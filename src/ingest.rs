//! Knowledge-base ingestion.
//!
//! Text → chunking → embedding → storage. Documents are deduplicated by
//! the SHA-256 of their content: re-ingesting the same text (or a new
//! version under the same name) regenerates the chunks of the existing
//! document instead of creating a second one. Chunks are embedded before
//! anything is written, so an embedding failure leaves the store as it
//! was.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::info;
use walkdir::WalkDir;

use concierge_core::chunk::{chunk_text, content_hash, ChunkParams};
use concierge_core::embedding::EmbeddingProvider;
use concierge_core::models::{Document, NewChunk};
use concierge_core::store::Store;

use crate::config::KnowledgeConfig;

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub name: String,
    pub chunks: usize,
    /// `true` when an existing document was re-chunked.
    pub updated: bool,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: ChunkParams,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingProvider>, params: ChunkParams) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    pub async fn ingest_text(
        &self,
        name: &str,
        doc_type: &str,
        source_url: Option<&str>,
        text: &str,
    ) -> Result<IngestReport> {
        let hash = content_hash(text);
        let pieces = chunk_text(text, &self.params);
        if pieces.is_empty() {
            bail!("document '{}' has no text content", name);
        }

        let existing = match self.store.find_document_by_hash(&hash).await? {
            Some(doc) => Some(doc),
            None => self.store.find_document_by_name(name).await?,
        };

        let inputs: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&inputs)
            .await
            .with_context(|| format!("Failed to embed chunks of '{}'", name))?;
        if vectors.len() != pieces.len() {
            bail!(
                "embedding provider returned {} vectors for {} chunks of '{}'",
                vectors.len(),
                pieces.len(),
                name
            );
        }

        let now = chrono::Utc::now().timestamp();
        let updated = existing.is_some();
        let document = match existing {
            Some(doc) => Document {
                name: name.to_string(),
                doc_type: doc_type.to_string(),
                source_url: source_url.map(str::to_string),
                content_hash: hash,
                updated_at: now,
                ..doc
            },
            None => Document {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_string(),
                doc_type: doc_type.to_string(),
                source_url: source_url.map(str::to_string),
                content_hash: hash,
                created_at: now,
                updated_at: now,
            },
        };
        let document_id = self.store.upsert_document(&document).await?;

        let chunks: Vec<NewChunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, embedding)| NewChunk {
                document_id: document_id.clone(),
                chunk_index: piece.index as i64,
                content: piece.content,
                context_before: piece.context_before,
                context_after: piece.context_after,
                source_name: name.to_string(),
                embedding,
            })
            .collect();
        let count = chunks.len();
        self.store
            .replace_chunks(&document_id, &chunks)
            .await
            .with_context(|| format!("Failed to store chunks of '{}'", name))?;

        info!(document = %name, chunks = count, updated, "document ingested");
        Ok(IngestReport {
            document_id,
            name: name.to_string(),
            chunks: count,
            updated,
        })
    }

    /// Read and ingest one file. The document name is `name` (usually the
    /// path relative to the knowledge root).
    pub async fn ingest_file(&self, path: &Path, name: &str) -> Result<IngestReport> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let doc_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "txt".to_string());
        let url = format!("file://{}", path.display());
        self.ingest_text(name, &doc_type, Some(&url), &text).await
    }

    /// Ingest every file [`scan_knowledge`] finds. Stops at the first
    /// failing document; documents before it stay ingested.
    pub async fn ingest_directory(&self, config: &KnowledgeConfig) -> Result<Vec<IngestReport>> {
        let files = scan_knowledge(config)?;
        info!(root = %config.root.display(), files = files.len(), "ingesting knowledge directory");
        let mut reports = Vec::with_capacity(files.len());
        for (path, name) in files {
            reports.push(self.ingest_file(&path, &name).await?);
        }
        Ok(reports)
    }

    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete_document(id).await?;
        if removed {
            info!(document_id = %id, "document deleted");
        }
        Ok(removed)
    }
}

/// Files under the knowledge root matching the include globs and none of
/// the exclude globs, sorted by relative path.
pub fn scan_knowledge(config: &KnowledgeConfig) -> Result<Vec<(PathBuf, String)>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Knowledge root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
