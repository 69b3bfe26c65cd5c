//! Heading- and paragraph-aware text chunker.
//!
//! Splits knowledge-base documents into [`ChunkPiece`]s sized for
//! embedding. Each piece carries short snippets of its neighbours
//! (`context_before` / `context_after`) so the prompt can show a chunk
//! with a little of the text around it.
//!
//! # Algorithm
//!
//! 1. Normalize line endings to `\n` and collapse runs of blank lines.
//! 2. Split into sections at `#`, `##` and `###` heading lines. Sections
//!    shorter than `min_chars` are merged into their neighbour.
//! 3. A section longer than `max_chars` is split on paragraph boundaries
//!    (`\n\n`). Each new piece starts with a trailing overlap of up to
//!    `overlap_chars` from the previous piece, trimmed forward to the
//!    nearest sentence or paragraph boundary. Paragraphs that are longer
//!    than `max_chars` on their own are hard-split at newline/space.
//! 4. Pieces shorter than `min_chars` are discarded. A document that is
//!    shorter than `min_chars` as a whole is emitted once, unchanged.
//! 5. Every piece is annotated with a ≈`context_chars` snippet of its
//!    neighbours, cut at sentence boundaries.
//!
//! The output is a pure function of `(text, params)`.
//!
//! # Example
//!
//! ```rust
//! use concierge_core::chunk::{chunk_text, ChunkParams};
//!
//! let chunks = chunk_text("# Breakfast\n\nServed on the terrace.", &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use sha2::{Digest, Sha256};

/// Size parameters for [`chunk_text`]. All lengths are in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Target upper bound for a piece before overlap is added.
    pub max_chars: usize,
    /// Trailing text carried from one piece into the next.
    pub overlap_chars: usize,
    /// Pieces shorter than this are dropped as non-informative.
    pub min_chars: usize,
    /// Length of the neighbour snippets.
    pub context_chars: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_chars: 200,
            min_chars: 150,
            context_chars: 200,
        }
    }
}

/// One emitted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Position in the document, contiguous from 0.
    pub index: usize,
    pub content: String,
    /// Tail of the previous piece, if any.
    pub context_before: Option<String>,
    /// Head of the next piece, if any.
    pub context_after: Option<String>,
    /// SHA-256 of `content`.
    pub hash: String,
}

/// Split `text` into annotated chunks.
///
/// # Guarantees
///
/// - Identical input and params give identical output.
/// - Indices are contiguous: `0, 1, …, N-1`.
/// - Every chunk has at least `min_chars` characters, unless the whole
///   document is shorter than that (then it is the only chunk).
/// - Empty or whitespace-only text yields no chunks.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<ChunkPiece> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let sections = merge_short_sections(split_sections(&normalized), params.min_chars);

    let mut pieces: Vec<String> = sections
        .iter()
        .flat_map(|section| split_section(section, params))
        .filter(|piece| char_len(piece) >= params.min_chars)
        .collect();

    if pieces.is_empty() {
        if let [only] = sections.as_slice() {
            pieces.push(only.clone());
        }
    }

    annotate(pieces, params.context_chars)
}

/// SHA-256 hex digest of a text, used as the document dedup key.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    (1..=3).contains(&hashes) && trimmed[hashes..].starts_with(' ')
}

fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if is_heading(line) && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }
    sections
}

fn merge_short_sections(sections: Vec<String>, min_chars: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(sections.len());
    let mut pending = String::new();
    for section in sections {
        let section = if pending.is_empty() {
            section
        } else {
            format!("{}\n\n{}", std::mem::take(&mut pending), section)
        };
        if char_len(&section) < min_chars {
            pending = section;
        } else {
            merged.push(section);
        }
    }
    if !pending.is_empty() {
        match merged.last_mut() {
            Some(last) => {
                last.push_str("\n\n");
                last.push_str(&pending);
            }
            None => merged.push(pending),
        }
    }
    merged
}

fn split_section(section: &str, params: &ChunkParams) -> Vec<String> {
    let max_chars = params.max_chars.max(1);
    if char_len(section) <= max_chars {
        return vec![section.to_string()];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    // Byte length of the overlap prefix at the start of `current`.
    let mut carried = 0usize;

    for para in section.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for part in hard_split(para, max_chars) {
            let would_be = if current.is_empty() {
                char_len(part)
            } else {
                char_len(&current) + 2 + char_len(part)
            };
            if would_be > max_chars
                && char_len(&current) >= params.min_chars
                && current.len() > carried
            {
                let tail = tail_snippet(&current, params.overlap_chars);
                let overlap = if tail.len() < current.len() {
                    tail.to_string()
                } else {
                    String::new()
                };
                pieces.push(std::mem::take(&mut current));
                current.push_str(&overlap);
                carried = current.len();
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(part);
        }
    }

    if current.len() > carried {
        match pieces.last_mut() {
            // A short remainder belongs to the previous piece rather than
            // being dropped by the length filter.
            Some(last) if char_len(&current) < params.min_chars => {
                last.push_str("\n\n");
                last.push_str(current[carried..].trim());
            }
            _ => pieces.push(current),
        }
    }

    pieces
}

/// Hard-split an oversized paragraph at the last newline or space that
/// keeps each part within `max_chars`.
fn hard_split(para: &str, max_chars: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut remaining = para;
    while char_len(remaining) > max_chars {
        let window = head_chars(remaining, max_chars);
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .unwrap_or(window.len());
        let (part, rest) = remaining.split_at(cut);
        let part = part.trim();
        if !part.is_empty() {
            parts.push(part);
        }
        remaining = rest.trim_start();
    }
    let rest = remaining.trim();
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

fn annotate(pieces: Vec<String>, context_chars: usize) -> Vec<ChunkPiece> {
    let count = pieces.len();
    pieces
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let context_before = if i > 0 {
                Some(tail_snippet(&pieces[i - 1], context_chars).to_string())
            } else {
                None
            };
            let context_after = if i + 1 < count {
                Some(head_snippet(&pieces[i + 1], context_chars))
            } else {
                None
            };
            ChunkPiece {
                index: i,
                content: content.clone(),
                context_before: context_before.filter(|s| !s.is_empty()),
                context_after: context_after.filter(|s| !s.is_empty()),
                hash: content_hash(content),
            }
        })
        .collect()
}

/// Byte offsets just past each sentence terminator or newline in `s`.
fn boundaries(s: &str) -> Vec<usize> {
    let mut out = Vec::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\n' => out.push(i + 1),
            '.' | '!' | '?' => match chars.peek() {
                Some(&(j, next)) if next.is_whitespace() => out.push(j),
                Some(_) => {}
                None => out.push(i + c.len_utf8()),
            },
            _ => {}
        }
    }
    out
}

/// First ≈`n` characters of `s`, ending at a sentence boundary when one
/// falls in the last two thirds of the window.
fn head_snippet(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    if char_len(s) <= n {
        return s.trim().to_string();
    }
    let window = head_chars(s, n);
    let min_cut = window.len() / 3;
    let cut = boundaries(window)
        .into_iter()
        .filter(|&b| b >= min_cut && b > 0)
        .last()
        .or_else(|| window.rfind(char::is_whitespace).filter(|&pos| pos > 0))
        .unwrap_or(window.len());
    window[..cut].trim().to_string()
}

/// Last ≈`n` characters of `s`, starting at a sentence boundary when one
/// falls in the first two thirds of the window.
fn tail_snippet(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    if char_len(s) <= n {
        return s.trim();
    }
    let window = tail_chars(s, n);
    let max_start = window.len() * 2 / 3;
    let start = boundaries(window)
        .into_iter()
        .find(|&b| b > 0 && b <= max_start)
        .or_else(|| window.find(char::is_whitespace))
        .unwrap_or(0);
    window[start..].trim()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn tail_chars(s: &str, n: usize) -> &str {
    let count = char_len(s);
    if count <= n {
        return s;
    }
    s.char_indices()
        .nth(count - n)
        .map(|(i, _)| &s[i..])
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(i: usize) -> String {
        format!(
            "Paragraph {} describes the lemon garden. Guests may pick fruit in season. Breakfast is served until ten.",
            i
        )
    }

    fn long_section(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(paragraph)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn small_params() -> ChunkParams {
        ChunkParams {
            max_chars: 300,
            overlap_chars: 80,
            min_chars: 150,
            context_chars: 60,
        }
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", &ChunkParams::default()).is_empty());
        assert!(chunk_text("  \n\n \r\n", &ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_short_document_emitted_whole() {
        let chunks = chunk_text("Check-out is at 11:00.", &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Check-out is at 11:00.");
        assert!(chunks[0].context_before.is_none());
        assert!(chunks[0].context_after.is_none());
    }

    #[test]
    fn test_deterministic() {
        let text = format!("# Garden\n\n{}\n\n## Pool\n\n{}", long_section(8), long_section(5));
        let a = chunk_text(&text, &small_params());
        let b = chunk_text(&text, &small_params());
        assert_eq!(a, b);
        assert!(a.len() > 2);
    }

    #[test]
    fn test_min_length_respected() {
        let mut text = String::new();
        for i in 0..12 {
            text.push_str(&format!("## Question {}\n\nShort answer {}.\n\n", i, i));
        }
        text.push_str(&long_section(6));
        let params = small_params();
        let chunks = chunk_text(&text, &params);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(
                c.content.chars().count() >= params.min_chars,
                "chunk {} too short: {:?}",
                c.index,
                c.content
            );
        }
        // Short FAQ sections are merged, not lost.
        let all: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(all.contains("Short answer 0."));
        assert!(all.contains("Short answer 11."));
    }

    #[test]
    fn test_heading_split() {
        let text = format!(
            "# Rooms\n\n{}\n\n## Restaurant\n\n{}",
            paragraph(1).repeat(2),
            paragraph(2).repeat(2)
        );
        let chunks = chunk_text(&text, &ChunkParams::default());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("# Rooms"));
        assert!(chunks[1].content.starts_with("## Restaurant"));
    }

    #[test]
    fn test_overlap_carried_forward() {
        let chunks = chunk_text(&long_section(9), &small_params());
        assert!(chunks.len() >= 3);
        for pair in chunks.windows(2) {
            let first_para = pair[1].content.split("\n\n").next().unwrap();
            assert!(
                pair[0].content.ends_with(first_para),
                "piece {} should start with the tail of piece {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let chunks = chunk_text(&long_section(20), &small_params());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_context_annotations() {
        let chunks = chunk_text(&long_section(9), &small_params());
        let last = chunks.len() - 1;
        assert!(chunks[0].context_before.is_none());
        assert!(chunks[last].context_after.is_none());
        for i in 0..last {
            let after = chunks[i].context_after.as_deref().unwrap();
            assert!(chunks[i + 1].content.starts_with(after));
            assert!(after.chars().count() <= 60);
        }
        for i in 1..=last {
            let before = chunks[i].context_before.as_deref().unwrap();
            assert!(chunks[i - 1].content.ends_with(before));
        }
    }

    #[test]
    fn test_line_endings_normalized() {
        let unix = format!("# Spa\n\n{}\n\n\n\n{}", paragraph(1), paragraph(2));
        let windows = unix.replace('\n', "\r\n");
        assert_eq!(
            chunk_text(&unix, &ChunkParams::default()),
            chunk_text(&windows, &ChunkParams::default())
        );
        let chunks = chunk_text(&unix, &ChunkParams::default());
        assert!(!chunks[0].content.contains("\n\n\n"));
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let word_soup = "limone ".repeat(200);
        let params = small_params();
        let chunks = chunk_text(&word_soup, &params);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.chars().count() <= params.max_chars + params.overlap_chars + 2);
        }
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Завтрак подаётся на террасе с видом на море. 🍋 ".repeat(40);
        let chunks = chunk_text(&text, &small_params());
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.content.is_empty());
        }
    }

    #[test]
    fn test_hash_is_sha256_of_content() {
        let chunks = chunk_text(&long_section(3), &ChunkParams::default());
        assert_eq!(chunks[0].hash, content_hash(&chunks[0].content));
        assert_eq!(chunks[0].hash.len(), 64);
    }
}
