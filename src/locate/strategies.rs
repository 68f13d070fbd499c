//! The text-based location strategies, ordered from literal match to
//! keyword anchoring. Each one is a standalone object so the cascade can be
//! reordered or thinned out under test.

use tracing::debug;

use crate::geometry::Rect;
use crate::page::PageSnapshot;

use super::normalize::{
    chunk_words, fold_text, normalize_snippet, partial_ratio, significant_words, split_sentences,
};
use super::{LocateStrategy, MatchMethod, TextMatch};

/// Snippets below this length skip the multiline strategy.
const MIN_MULTILINE_CHARS: usize = 50;
/// Word-boundary chunk size for multiline anchoring.
const CHUNK_TARGET_CHARS: usize = 50;
/// Share of chunks that must be found, with an absolute floor.
const CHUNK_MIN_RATIO: f64 = 0.6;
const CHUNK_MIN_FOUND: usize = 2;
/// First/last fallback: how far above the first chunk the last may sit.
const ANCHOR_TOLERANCE_PTS: f32 = 5.0;
const SENTENCE_MIN_COUNT: usize = 2;
const KEYWORD_MAX: usize = 10;
const KEYWORD_MIN_MATCHES: usize = 3;

/// The default cascade in fixed order. `fuzzy_cutoff` is on the 0–100 scale.
pub fn default_strategies(fuzzy_cutoff: f64) -> Vec<Box<dyn LocateStrategy + Send + Sync>> {
    vec![
        Box::new(ExactStrategy),
        Box::new(NormalizedStrategy),
        Box::new(MultilineStrategy),
        Box::new(SentenceStrategy),
        Box::new(FuzzyStrategy { cutoff: fuzzy_cutoff }),
        Box::new(KeywordStrategy),
    ]
}

// ---------------------------------------------------------------------------
// 1. Exact
// ---------------------------------------------------------------------------

/// Literal substring search of the raw snippet.
pub struct ExactStrategy;

impl LocateStrategy for ExactStrategy {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn try_locate(&self, snap: &PageSnapshot, snippet: &str) -> Option<Vec<TextMatch>> {
        let hits = snap.find_all(snippet);
        if hits.is_empty() {
            return None;
        }
        Some(
            hits.into_iter()
                .map(|h| TextMatch {
                    rect: h.rect,
                    quads: h.quads,
                    confidence: 1.0,
                    method: MatchMethod::Exact,
                    matched_text: snippet.to_string(),
                })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// 2. Normalized
// ---------------------------------------------------------------------------

/// Retry with folded quotes/dashes/ligatures and collapsed whitespace on
/// both the snippet and the page. Skipped only when that retry would be
/// byte-identical to the exact search.
pub struct NormalizedStrategy;

impl LocateStrategy for NormalizedStrategy {
    fn name(&self) -> &'static str {
        "normalized"
    }

    fn try_locate(&self, snap: &PageSnapshot, snippet: &str) -> Option<Vec<TextMatch>> {
        let normalized = normalize_snippet(snippet);
        if normalized == snippet && !snap.has_normalization_changes() {
            return None;
        }
        let hits = snap.find_all_normalized(&normalized);
        if hits.is_empty() {
            return None;
        }
        Some(
            hits.into_iter()
                .map(|h| TextMatch {
                    rect: h.rect,
                    quads: h.quads,
                    confidence: 0.95,
                    method: MatchMethod::Normalized,
                    matched_text: normalized.clone(),
                })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// 3. Multiline chunks
// ---------------------------------------------------------------------------

/// Long snippets rarely survive line wrapping verbatim. Split into
/// ~50-character word chunks, anchor each independently, and accept a
/// majority of anchors; a first+last anchor pair is the fallback.
pub struct MultilineStrategy;

impl LocateStrategy for MultilineStrategy {
    fn name(&self) -> &'static str {
        "multiline"
    }

    fn try_locate(&self, snap: &PageSnapshot, snippet: &str) -> Option<Vec<TextMatch>> {
        let normalized = normalize_snippet(snippet);
        if normalized.chars().count() < MIN_MULTILINE_CHARS {
            return None;
        }
        let chunks = chunk_words(&normalized, CHUNK_TARGET_CHARS);
        if chunks.len() < 2 {
            return None;
        }

        let found: Vec<Rect> = chunks
            .iter()
            .filter_map(|chunk| snap.find_all_normalized(chunk).first().map(|h| h.rect))
            .collect();
        let needed =
            ((chunks.len() as f64 * CHUNK_MIN_RATIO).ceil() as usize).max(CHUNK_MIN_FOUND);

        if found.len() >= needed {
            let rect = Rect::union_all(found.iter().copied())?;
            let confidence = found.len() as f32 / chunks.len() as f32;
            debug!(found = found.len(), total = chunks.len(), "multiline chunks anchored");
            return Some(vec![TextMatch {
                rect,
                quads: Vec::new(),
                confidence,
                method: MatchMethod::Multiline,
                matched_text: format!("matched {}/{} chunks", found.len(), chunks.len()),
            }]);
        }

        // First and last chunk can still bracket the span when the middle is
        // broken up by hyphenation or figures.
        if chunks.len() >= 3 {
            let first = snap.find_all_normalized(&chunks[0]).first().map(|h| h.rect);
            let last = snap
                .find_all_normalized(chunks.last().map(String::as_str)?)
                .first()
                .map(|h| h.rect);
            if let (Some(first), Some(last)) = (first, last) {
                if last.top() <= first.top() + ANCHOR_TOLERANCE_PTS {
                    return Some(vec![TextMatch {
                        rect: first.union(&last),
                        quads: Vec::new(),
                        confidence: 0.85,
                        method: MatchMethod::Multiline,
                        matched_text: format!("first/last anchors of {} chunks", chunks.len()),
                    }]);
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// 4. Sentences
// ---------------------------------------------------------------------------

/// Multi-sentence snippets anchor per sentence; half of them found is
/// enough to bound the span.
pub struct SentenceStrategy;

impl LocateStrategy for SentenceStrategy {
    fn name(&self) -> &'static str {
        "sentence"
    }

    fn try_locate(&self, snap: &PageSnapshot, snippet: &str) -> Option<Vec<TextMatch>> {
        let normalized = normalize_snippet(snippet);
        let sentences = split_sentences(&normalized);
        if sentences.len() < SENTENCE_MIN_COUNT {
            return None;
        }
        let found: Vec<Rect> = sentences
            .iter()
            .filter_map(|s| snap.find_all_normalized(s).first().map(|h| h.rect))
            .collect();
        if found.is_empty() || found.len() * 2 < sentences.len() {
            return None;
        }
        let rect = Rect::union_all(found.iter().copied())?;
        let confidence = found.len() as f32 / sentences.len() as f32;
        Some(vec![TextMatch {
            rect,
            quads: Vec::new(),
            confidence,
            method: MatchMethod::Sentence,
            matched_text: format!("matched {}/{} sentences", found.len(), sentences.len()),
        }])
    }
}

// ---------------------------------------------------------------------------
// 5. Fuzzy blocks
// ---------------------------------------------------------------------------

/// Best-aligned similarity of the snippet against each text block.
pub struct FuzzyStrategy {
    /// Acceptance cutoff on the 0–100 scale.
    pub cutoff: f64,
}

impl LocateStrategy for FuzzyStrategy {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn try_locate(&self, snap: &PageSnapshot, snippet: &str) -> Option<Vec<TextMatch>> {
        let needle = normalize_snippet(snippet).to_lowercase();
        if needle.is_empty() {
            return None;
        }
        let mut best: Option<(f64, usize)> = None;
        for (idx, block) in snap.blocks.iter().enumerate() {
            let hay = fold_text(&block.text).to_lowercase();
            let score = partial_ratio(&needle, &hay);
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, idx));
            }
        }
        let (score, idx) = best?;
        if score < self.cutoff {
            return None;
        }
        let block = &snap.blocks[idx];
        let excerpt: String = block.text.chars().take(80).collect();
        Some(vec![TextMatch {
            rect: block.rect,
            quads: Vec::new(),
            confidence: (score / 100.0) as f32,
            method: MatchMethod::Fuzzy,
            matched_text: excerpt,
        }])
    }
}

// ---------------------------------------------------------------------------
// 6. Keyword anchors
// ---------------------------------------------------------------------------

/// Last text resort: the block holding the most of the snippet's
/// significant words, if at least three of them land there.
pub struct KeywordStrategy;

impl LocateStrategy for KeywordStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn try_locate(&self, snap: &PageSnapshot, snippet: &str) -> Option<Vec<TextMatch>> {
        let keywords = significant_words(&normalize_snippet(snippet), KEYWORD_MAX);
        if keywords.len() < KEYWORD_MIN_MATCHES {
            return None;
        }
        let mut best: Option<(Vec<String>, usize)> = None;
        for (idx, block) in snap.blocks.iter().enumerate() {
            let hay = fold_text(&block.text).to_lowercase();
            let matched: Vec<String> = keywords
                .iter()
                .filter(|k| hay.contains(k.as_str()))
                .cloned()
                .collect();
            if best.as_ref().map_or(true, |(m, _)| matched.len() > m.len()) {
                best = Some((matched, idx));
            }
        }
        let (matched, idx) = best?;
        if matched.len() < KEYWORD_MIN_MATCHES {
            return None;
        }
        let confidence = matched.len() as f32 / keywords.len() as f32;
        Some(vec![TextMatch {
            rect: snap.blocks[idx].rect,
            quads: Vec::new(),
            confidence,
            method: MatchMethod::Keyword,
            matched_text: format!("keywords: {}", matched.join(", ")),
        }])
    }
}
