//! Retrieval-augmented generation: from a guest question to ranked
//! knowledge-base chunks.
//!
//! # Pipeline
//!
//! 1. **Language normalization**: a query containing non-Latin letters
//!    (Cyrillic, Greek, CJK, …) is translated to English with the chat
//!    model, since the knowledge base is English-only.
//! 2. **Query expansion (HyDE)**: the chat model drafts a short passage
//!    that would answer the question; that passage is embedded instead
//!    of the raw question.
//! 3. **Over-fetch**: vector search with `limit × overfetch_factor` and
//!    the relaxed `min(threshold, overfetch_threshold)` cut.
//! 4. **Lexical re-rank** against the (translated) query, see
//!    [`crate::search`].
//! 5. Keep hits whose boosted score clears `threshold`, truncate to
//!    `limit`.
//!
//! Steps 1 and 2 fall back to the unmodified query on any failure.
//! Embedding and store failures are errors. No match is an empty list.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chat::{complete_text, ChatProvider};
use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::search::{rerank, RankedChunk, RerankWeights};
use crate::store::{SearchOptions, Store};

const TRANSLATE_INSTRUCTION: &str = "Translate the guest's message into English. \
Keep names, dates and numbers unchanged. Reply with the translation only.";

const HYDE_INSTRUCTION: &str = "You write short passages for the information pages of a \
small boutique hotel. Write two or three factual sentences that would answer the guest's \
question as if they came from the hotel's own documentation. Reply with the passage only.";

/// Tuning for [`RetrievalService`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub overfetch_factor: usize,
    pub overfetch_threshold: f32,
    pub translate: bool,
    pub hyde: bool,
    pub weights: RerankWeights,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            overfetch_threshold: 0.25,
            translate: true,
            hyde: true,
            weights: RerankWeights::default(),
        }
    }
}

pub struct RetrievalService {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
    /// Used for translation and HyDE; both are skipped when absent.
    chat: Option<Arc<dyn ChatProvider>>,
    settings: RetrievalSettings,
}

impl RetrievalService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn Store>,
        chat: Option<Arc<dyn ChatProvider>>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            chat,
            settings,
        }
    }

    /// Ranked chunks relevant to `query`, best first.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RankedChunk>, RetrievalError> {
        let query = query.trim();
        if query.is_empty() || options.limit == 0 {
            return Ok(Vec::new());
        }

        let english = self.normalize_language(query).await;
        let to_embed = self.expand(&english).await;

        let vector = embed_one(self.embedder.as_ref(), &to_embed).await?;

        let wide = SearchOptions {
            limit: options.limit.saturating_mul(self.settings.overfetch_factor.max(1)),
            threshold: options.threshold.min(self.settings.overfetch_threshold),
        };
        let candidates = self.store.search(&vector, &wide).await?;
        let candidate_count = candidates.len();

        let mut ranked: Vec<RankedChunk> = rerank(&english, candidates, &self.settings.weights)
            .into_iter()
            .filter(|r| r.score > options.threshold)
            .collect();
        ranked.truncate(options.limit);

        debug!(
            candidates = candidate_count,
            returned = ranked.len(),
            "retrieval complete"
        );
        Ok(ranked)
    }

    async fn normalize_language(&self, query: &str) -> String {
        let Some(chat) = self.chat.as_ref().filter(|_| self.settings.translate) else {
            return query.to_string();
        };
        if !has_non_latin_letters(query) {
            return query.to_string();
        }
        match complete_text(chat.as_ref(), TRANSLATE_INSTRUCTION, query).await {
            Ok(translated) => {
                debug!("query translated to English");
                translated
            }
            Err(e) => {
                warn!(error = %e, "query translation failed, using original text");
                query.to_string()
            }
        }
    }

    async fn expand(&self, query: &str) -> String {
        let Some(chat) = self.chat.as_ref().filter(|_| self.settings.hyde) else {
            return query.to_string();
        };
        match complete_text(chat.as_ref(), HYDE_INSTRUCTION, query).await {
            Ok(passage) => passage,
            Err(e) => {
                warn!(error = %e, "query expansion failed, embedding the query itself");
                query.to_string()
            }
        }
    }
}

/// Whether `text` contains letters outside the Latin script blocks.
pub fn has_non_latin_letters(text: &str) -> bool {
    text.chars().any(|c| {
        c.is_alphabetic()
            && !(c.is_ascii()
                || ('\u{00C0}'..='\u{024F}').contains(&c)
                || ('\u{1E00}'..='\u{1EFF}').contains(&c))
    })
}
