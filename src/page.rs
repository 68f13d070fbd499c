//! Owned per-page view of a document: words with bounding boxes, line and
//! block structure, and a searchable text stream the words map back into.
//!
//! A snapshot is extracted once per page at the document boundary, so the
//! classifier, the locator strategies, and their tests all run against plain
//! data instead of live PDF handles.

use crate::geometry::{Quad, Rect};
use crate::locate::normalize::fold_text;

/// Vertical gap (relative to line height) beyond which consecutive lines
/// start a new text block.
const BLOCK_GAP_FACTOR: f32 = 0.9;

/// A word with its page-space box and the index of the line it sits on.
#[derive(Debug, Clone, PartialEq)]
pub struct WordBox {
    pub text: String,
    pub rect: Rect,
    pub line: usize,
}

/// Consecutive lines grouped into a paragraph-level block.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub rect: Rect,
}

/// A literal hit in the page text, mapped back to geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundSpan {
    /// Union of every word the hit touches.
    pub rect: Rect,
    /// One quad per line the hit touches, in reading order.
    pub quads: Vec<Quad>,
    /// The touched page words, space-joined.
    pub text: String,
}

/// Byte range of one word inside a text stream.
#[derive(Debug, Clone)]
struct WordSpan {
    start: usize,
    end: usize,
    word: usize,
}

#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// 0-based index in the document.
    pub page_index: usize,
    /// 1-based page number as provenance records count pages.
    pub page_number: u32,
    /// Page size in points.
    pub width: f32,
    pub height: f32,
    /// Raster image objects on the page.
    pub image_count: usize,
    pub words: Vec<WordBox>,
    pub blocks: Vec<TextBlock>,
    text: String,
    normalized_text: String,
    spans: Vec<WordSpan>,
    normalized_spans: Vec<WordSpan>,
}

impl PageSnapshot {
    /// Builds a snapshot from words in reading order. Words carry their line
    /// index; everything else (text streams, spans, blocks) derives from them.
    ///
    /// The searchable text is all words joined by single spaces. Line breaks
    /// are deliberately not represented as separators so literal search can
    /// cross them; line structure survives in [`WordBox::line`].
    pub fn from_words(
        page_index: usize,
        width: f32,
        height: f32,
        image_count: usize,
        words: Vec<WordBox>,
    ) -> Self {
        let (text, spans) = join_words(&words, |w| w.text.clone());
        let (normalized_text, normalized_spans) = join_words(&words, |w| fold_text(&w.text));
        let blocks = build_blocks(&words);
        Self {
            page_index,
            page_number: page_index as u32 + 1,
            width,
            height,
            image_count,
            words,
            blocks,
            text,
            normalized_text,
            spans,
            normalized_spans,
        }
    }

    /// Test and mock helper: lays lines of text on a fixed grid
    /// (6 pt per char, 12 pt line boxes, 16 pt leading) on a Letter page.
    pub fn from_lines(page_index: usize, lines: &[&str]) -> Self {
        const CHAR_W: f32 = 6.0;
        const LINE_H: f32 = 12.0;
        const LEADING: f32 = 16.0;
        let height = 792.0;
        let mut words = Vec::new();
        for (line_idx, line) in lines.iter().enumerate() {
            let top = height - 72.0 - line_idx as f32 * LEADING;
            let mut x = 72.0;
            for word in line.split_whitespace() {
                let w = word.chars().count() as f32 * CHAR_W;
                words.push(WordBox {
                    text: word.to_string(),
                    rect: Rect::new(x, top - LINE_H, x + w, top),
                    line: line_idx,
                });
                x += w + CHAR_W;
            }
        }
        Self::from_words(page_index, 612.0, height, 0, words)
    }

    pub fn with_images(mut self, image_count: usize) -> Self {
        self.image_count = image_count;
        self
    }

    /// The space-joined word stream literal search runs against.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Same stream with quote/dash/ligature variants folded.
    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    /// Character count of the extracted text.
    pub fn text_length(&self) -> usize {
        self.text.chars().count()
    }

    /// Whether folding changed anything on this page.
    pub fn has_normalization_changes(&self) -> bool {
        self.text != self.normalized_text
    }

    /// Every literal occurrence of `needle` in the raw text stream.
    pub fn find_all(&self, needle: &str) -> Vec<FoundSpan> {
        self.search(&self.text, &self.spans, needle)
    }

    /// Every literal occurrence of `needle` in the folded text stream.
    pub fn find_all_normalized(&self, needle: &str) -> Vec<FoundSpan> {
        self.search(&self.normalized_text, &self.normalized_spans, needle)
    }

    fn search(&self, hay: &str, spans: &[WordSpan], needle: &str) -> Vec<FoundSpan> {
        if needle.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for (start, matched) in hay.match_indices(needle) {
            let end = start + matched.len();
            let word_indices: Vec<usize> = spans
                .iter()
                .filter(|s| s.start < end && s.end > start)
                .map(|s| s.word)
                .collect();
            if word_indices.is_empty() {
                continue;
            }
            let rect = match Rect::union_all(word_indices.iter().map(|&w| self.words[w].rect)) {
                Some(r) => r,
                None => continue,
            };
            out.push(FoundSpan {
                rect,
                quads: self.line_quads(&word_indices),
                text: word_indices
                    .iter()
                    .map(|&w| self.words[w].text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            });
        }
        out
    }

    /// One quad per line covered by the given words.
    fn line_quads(&self, word_indices: &[usize]) -> Vec<Quad> {
        let mut quads = Vec::new();
        let mut current_line: Option<usize> = None;
        let mut current_rect: Option<Rect> = None;
        for &w in word_indices {
            let word = &self.words[w];
            match (current_line, current_rect) {
                (Some(line), Some(rect)) if line == word.line => {
                    current_rect = Some(rect.union(&word.rect));
                }
                (Some(_), Some(rect)) => {
                    quads.push(Quad::from_rect(&rect));
                    current_line = Some(word.line);
                    current_rect = Some(word.rect);
                }
                _ => {
                    current_line = Some(word.line);
                    current_rect = Some(word.rect);
                }
            }
        }
        if let Some(rect) = current_rect {
            quads.push(Quad::from_rect(&rect));
        }
        quads
    }
}

/// Joins word texts with single spaces, recording each word's byte span.
fn join_words<F>(words: &[WordBox], mut text_of: F) -> (String, Vec<WordSpan>)
where
    F: FnMut(&WordBox) -> String,
{
    let mut text = String::new();
    let mut spans = Vec::with_capacity(words.len());
    for (idx, word) in words.iter().enumerate() {
        if !text.is_empty() {
            text.push(' ');
        }
        let start = text.len();
        text.push_str(&text_of(word));
        spans.push(WordSpan {
            start,
            end: text.len(),
            word: idx,
        });
    }
    (text, spans)
}

/// Groups lines into paragraph blocks by vertical gap.
fn build_blocks(words: &[WordBox]) -> Vec<TextBlock> {
    if words.is_empty() {
        return Vec::new();
    }
    // Per-line rect and text, in line order.
    let mut lines: Vec<(usize, Rect, String)> = Vec::new();
    for word in words {
        match lines.last_mut() {
            Some((line, rect, text)) if *line == word.line => {
                *rect = rect.union(&word.rect);
                text.push(' ');
                text.push_str(&word.text);
            }
            _ => lines.push((word.line, word.rect, word.text.clone())),
        }
    }

    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut block_rect: Option<Rect> = None;
    let mut block_text = String::new();
    let mut prev: Option<Rect> = None;
    for (_, rect, text) in &lines {
        let starts_new = match prev {
            None => false,
            Some(prev_rect) => {
                let gap = prev_rect.y0 - rect.y1;
                let line_h = rect.height().max(prev_rect.height()).max(1.0);
                gap > line_h * BLOCK_GAP_FACTOR
            }
        };
        if starts_new {
            if let Some(r) = block_rect {
                blocks.push(TextBlock { text: std::mem::take(&mut block_text), rect: r });
            }
            block_rect = None;
        }
        block_rect = Some(match block_rect {
            Some(r) => r.union(rect),
            None => *rect,
        });
        if !block_text.is_empty() {
            block_text.push(' ');
        }
        block_text.push_str(text);
        prev = Some(*rect);
    }
    if let Some(r) = block_rect {
        blocks.push(TextBlock { text: block_text, rect: r });
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── text stream ──

    #[test]
    fn text_joins_words_across_lines_with_spaces() {
        let snap = PageSnapshot::from_lines(0, &["alpha beta", "gamma"]);
        assert_eq!(snap.text(), "alpha beta gamma");
        assert_eq!(snap.page_number, 1);
        assert_eq!(snap.text_length(), 16);
    }

    #[test]
    fn empty_page_has_empty_text_and_no_blocks() {
        let snap = PageSnapshot::from_words(0, 612.0, 792.0, 0, Vec::new());
        assert_eq!(snap.text(), "");
        assert!(snap.blocks.is_empty());
        assert!(snap.find_all("anything").is_empty());
    }

    // ── literal search ──

    #[test]
    fn finds_single_word_with_its_box() {
        let snap = PageSnapshot::from_lines(0, &["alpha beta gamma"]);
        let hits = snap.find_all("beta");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rect, snap.words[1].rect);
        assert_eq!(hits[0].quads.len(), 1);
        assert_eq!(hits[0].text, "beta");
    }

    #[test]
    fn finds_span_across_a_line_break_with_two_quads() {
        let snap = PageSnapshot::from_lines(0, &["the quick brown", "fox jumps"]);
        let hits = snap.find_all("brown fox");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].quads.len(), 2);
        let expected = snap.words[2].rect.union(&snap.words[3].rect);
        assert_eq!(hits[0].rect, expected);
    }

    #[test]
    fn finds_every_occurrence() {
        let snap = PageSnapshot::from_lines(0, &["dose dose escalation dose"]);
        assert_eq!(snap.find_all("dose").len(), 3);
    }

    #[test]
    fn substring_hit_covers_the_whole_word() {
        let snap = PageSnapshot::from_lines(0, &["followup visits"]);
        let hits = snap.find_all("follow");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rect, snap.words[0].rect);
        assert_eq!(hits[0].text, "followup");
    }

    // ── normalization view ──

    #[test]
    fn folded_stream_matches_straight_quotes() {
        let snap = PageSnapshot::from_lines(0, &["the \u{201C}primary\u{201D} endpoint"]);
        assert!(snap.find_all("\"primary\"").is_empty());
        let hits = snap.find_all_normalized("\"primary\"");
        assert_eq!(hits.len(), 1);
        assert!(snap.has_normalization_changes());
    }

    #[test]
    fn plain_ascii_page_reports_no_normalization_changes() {
        let snap = PageSnapshot::from_lines(0, &["plain ascii text only"]);
        assert!(!snap.has_normalization_changes());
    }

    // ── blocks ──

    #[test]
    fn close_lines_share_a_block_and_gaps_split() {
        // from_lines uses 16 pt leading with 12 pt boxes: a 4 pt gap keeps
        // lines together; an inserted empty line makes the gap 20 pt.
        let snap = PageSnapshot::from_lines(0, &["first paragraph line", "second line", "", "next paragraph"]);
        assert_eq!(snap.blocks.len(), 2);
        assert_eq!(snap.blocks[0].text, "first paragraph line second line");
        assert_eq!(snap.blocks[1].text, "next paragraph");
    }

    #[test]
    fn block_rect_covers_its_lines() {
        let snap = PageSnapshot::from_lines(0, &["alpha beta", "gamma delta"]);
        assert_eq!(snap.blocks.len(), 1);
        let all = Rect::union_all(snap.words.iter().map(|w| w.rect)).unwrap();
        assert_eq!(snap.blocks[0].rect, all);
    }
}
