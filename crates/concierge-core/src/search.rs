//! Lexical re-ranking and prompt formatting for retrieved chunks.
//!
//! Vector similarity alone misses exact terminology ("check-out",
//! "parking", a room name). The re-ranker adds a bounded keyword boost:
//!
//! ```text
//! boost = overlap_ratio × keyword_weight + min(exact_matches × exact_match_bonus, exact_match_cap)
//! score = similarity + min(boost, max_boost)
//! ```
//!
//! where `overlap_ratio` is the share of query terms found anywhere in
//! the chunk and `exact_matches` counts terms present as whole words.
//! Query terms are lower-cased alphanumeric words longer than two
//! characters. Final order is `score` descending, ties broken by the raw
//! `similarity` descending, then by the incoming order.

use serde::Serialize;
use std::collections::HashSet;

use crate::models::{ScoredChunk, StoredChunk};

/// Re-ranking weights. Tunable; not a contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    pub keyword_weight: f32,
    pub exact_match_bonus: f32,
    pub exact_match_cap: f32,
    pub max_boost: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            keyword_weight: 0.15,
            exact_match_bonus: 0.05,
            exact_match_cap: 0.10,
            max_boost: 0.25,
        }
    }
}

/// A chunk after re-ranking.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedChunk {
    pub chunk: StoredChunk,
    /// Raw cosine similarity from the vector store.
    pub similarity: f32,
    /// `similarity` plus the lexical boost.
    pub score: f32,
}

/// Lower-cased words longer than two characters, deduplicated in order.
pub fn query_terms(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut seen = HashSet::new();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// The keyword boost for one chunk, in `[0, max_boost]`.
pub fn lexical_boost(terms: &[String], content: &str, weights: &RerankWeights) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = content.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let found = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    let exact = terms.iter().filter(|t| words.contains(t.as_str())).count();

    let overlap = found as f32 / terms.len() as f32;
    let exact_bonus = (exact as f32 * weights.exact_match_bonus).min(weights.exact_match_cap);
    (overlap * weights.keyword_weight + exact_bonus).clamp(0.0, weights.max_boost)
}

/// Re-rank vector hits against the query text.
pub fn rerank(query: &str, hits: Vec<ScoredChunk>, weights: &RerankWeights) -> Vec<RankedChunk> {
    let terms = query_terms(query);
    let mut ranked: Vec<RankedChunk> = hits
        .into_iter()
        .map(|hit| {
            let boost = lexical_boost(&terms, &hit.chunk.content, weights);
            RankedChunk {
                score: hit.similarity + boost,
                similarity: hit.similarity,
                chunk: hit.chunk,
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.similarity.total_cmp(&a.similarity))
    });
    ranked
}

const RULE: &str = "═══════════════════════════════════════════════════════════════";

/// Render retrieved chunks for the system prompt, most relevant first.
///
/// Returns an empty string for no results so callers can omit the
/// knowledge block entirely.
pub fn format_knowledge(results: &[RankedChunk]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let sections: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut section = format!("[Knowledge {} - Source: {}]\n", i + 1, r.chunk.source_name);
            if let Some(before) = r.chunk.context_before.as_deref().filter(|s| !s.is_empty()) {
                section.push_str(&format!("...{}\n", before));
            }
            section.push_str(&r.chunk.content);
            section.push('\n');
            if let Some(after) = r.chunk.context_after.as_deref().filter(|s| !s.is_empty()) {
                section.push_str(&format!("{}...\n", after));
            }
            section.push_str(&format!(
                "(Relevance: {:.1}%)",
                (r.score.min(1.0) * 100.0).max(0.0)
            ));
            section
        })
        .collect();

    format!(
        "{rule}\nRELEVANT KNOWLEDGE BASE INFORMATION\n{rule}\n\n{body}\n\n{rule}\n\
         Use the information above to answer questions accurately. If the knowledge base \
         doesn't contain relevant information, say so honestly.\n{rule}\n",
        rule = RULE,
        body = sections.join("\n\n")
    )
}
