//! Text location: an ordered strategy cascade that turns a provenance
//! snippet into page geometry, with an OCR fallback for scanned pages.
//!
//! Strategies are trait objects in a fixed order; the first one to produce
//! matches wins and nothing after it runs. The OCR path is separate from the
//! cascade because it needs rasterization and an engine, and it only runs
//! when the page demands it or every text strategy came up empty.

pub mod normalize;
pub mod ocr;
pub mod strategies;

#[cfg(feature = "ocr")]
pub use ocr::TesseractOcr;
pub use ocr::{MockOcrEngine, OcrEngine, OcrError, OcrWord, PixelBox};
pub use strategies::default_strategies;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::PageType;
use crate::config::AnnotatorConfig;
use crate::document::DocumentReader;
use crate::geometry::{Quad, Rect};
use crate::page::PageSnapshot;

use normalize::{match_words, ratio};

/// Neither raster dimension may exceed this during OCR rasterization.
const OCR_MAX_DIMENSION_PX: f32 = 4000.0;
const POINTS_PER_INCH: f32 = 72.0;
/// Confidence carried by an exact OCR token-window hit.
const OCR_EXACT_CONFIDENCE: f32 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Normalized,
    Multiline,
    Sentence,
    Fuzzy,
    Keyword,
    Ocr,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Normalized => "normalized",
            Self::Multiline => "multiline",
            Self::Sentence => "sentence",
            Self::Fuzzy => "fuzzy",
            Self::Keyword => "keyword",
            Self::Ocr => "ocr",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a snippet was found and how much to trust it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub rect: Rect,
    /// Per-line quads for native highlights; empty for aggregate methods,
    /// in which case the rect stands alone.
    pub quads: Vec<Quad>,
    /// In (0.0, 1.0]; each downgrade along the cascade lowers it.
    pub confidence: f32,
    pub method: MatchMethod,
    /// Literal text for literal methods, a short summary for aggregate ones.
    pub matched_text: String,
}

/// One step of the cascade.
pub trait LocateStrategy {
    fn name(&self) -> &'static str;

    /// `Some(non-empty)` claims the snippet and stops the cascade;
    /// `None` or `Some(empty)` passes it along.
    fn try_locate(&self, snap: &PageSnapshot, snippet: &str) -> Option<Vec<TextMatch>>;
}

/// Runs the strategy cascade and the OCR fallback for one page at a time.
pub struct TextLocator {
    strategies: Vec<Box<dyn LocateStrategy + Send + Sync>>,
    ocr: Option<Box<dyn OcrEngine + Send + Sync>>,
    ocr_language: String,
    ocr_dpi: u32,
    /// 0–100 scale, shared by the fuzzy strategy and the OCR fuzzy window.
    fuzzy_cutoff: f64,
}

impl TextLocator {
    pub fn new(
        config: &AnnotatorConfig,
        ocr: Option<Box<dyn OcrEngine + Send + Sync>>,
    ) -> Self {
        let fuzzy_cutoff = f64::from(config.fuzzy_threshold) * 100.0;
        Self {
            strategies: default_strategies(fuzzy_cutoff),
            ocr,
            ocr_language: config.ocr_language.clone(),
            ocr_dpi: config.ocr_dpi,
            fuzzy_cutoff,
        }
    }

    /// Replaces the text cascade. Order is significant.
    pub fn with_strategies(
        mut self,
        strategies: Vec<Box<dyn LocateStrategy + Send + Sync>>,
    ) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn has_ocr(&self) -> bool {
        self.ocr.is_some()
    }

    /// First match of the first successful strategy.
    pub fn locate(
        &self,
        reader: &dyn DocumentReader,
        snap: &PageSnapshot,
        snippet: &str,
        page_type: PageType,
    ) -> Option<TextMatch> {
        self.locate_all(reader, snap, snippet, page_type)
            .into_iter()
            .next()
    }

    /// Every occurrence reported by the winning strategy.
    pub fn locate_all(
        &self,
        reader: &dyn DocumentReader,
        snap: &PageSnapshot,
        snippet: &str,
        page_type: PageType,
    ) -> Vec<TextMatch> {
        let snippet = snippet.trim();
        if snippet.is_empty() {
            return Vec::new();
        }
        if page_type.is_text_capable() {
            for strategy in &self.strategies {
                if let Some(matches) = strategy.try_locate(snap, snippet) {
                    if !matches.is_empty() {
                        debug!(
                            page = snap.page_number,
                            strategy = strategy.name(),
                            hits = matches.len(),
                            confidence = matches[0].confidence,
                            "snippet located"
                        );
                        return matches;
                    }
                }
            }
        }
        self.locate_ocr(reader, snap, snippet)
            .map(|m| vec![m])
            .unwrap_or_default()
    }

    /// OCR fallback. Quietly absent without an engine; render or engine
    /// failures degrade to a logged miss.
    fn locate_ocr(
        &self,
        reader: &dyn DocumentReader,
        snap: &PageSnapshot,
        snippet: &str,
    ) -> Option<TextMatch> {
        let engine = self.ocr.as_deref()?;
        let zoom = ocr_zoom(snap.width, snap.height, self.ocr_dpi);
        let png = match reader.render_png(snap.page_index, zoom) {
            Ok(png) => png,
            Err(e) => {
                warn!(page = snap.page_number, error = %e, "rasterization for OCR failed");
                return None;
            }
        };
        let words = match engine.recognize(&png, &self.ocr_language) {
            Ok(words) => words,
            Err(e) => {
                warn!(page = snap.page_number, error = %e, "OCR failed");
                return None;
            }
        };
        let found = match_ocr_tokens(&words, snippet, zoom, snap.height, self.fuzzy_cutoff);
        if let Some(m) = &found {
            debug!(
                page = snap.page_number,
                confidence = m.confidence,
                "snippet located via OCR"
            );
        }
        found
    }
}

/// DPI-derived zoom (pixels per point), clamped so neither raster dimension
/// exceeds the hard cap.
pub fn ocr_zoom(width_pts: f32, height_pts: f32, dpi: u32) -> f32 {
    let mut zoom = dpi as f32 / POINTS_PER_INCH;
    let max_side = width_pts.max(height_pts);
    if max_side > 0.0 && max_side * zoom > OCR_MAX_DIMENSION_PX {
        zoom = OCR_MAX_DIMENSION_PX / max_side;
    }
    zoom
}

/// Sliding token window over OCR words: an exact window wins at fixed
/// confidence, otherwise the best fuzzy window above the cutoff.
fn match_ocr_tokens(
    words: &[OcrWord],
    snippet: &str,
    zoom: f32,
    page_height: f32,
    cutoff: f64,
) -> Option<TextMatch> {
    let needle = match_words(snippet);
    if needle.is_empty() {
        return None;
    }
    let tokens: Vec<(String, PixelBox)> = words
        .iter()
        .filter_map(|w| {
            let t = w
                .text
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if t.is_empty() {
                None
            } else {
                Some((t, w.bounding_box))
            }
        })
        .collect();
    let n = needle.len();
    if tokens.len() < n {
        return None;
    }

    for start in 0..=tokens.len() - n {
        let window = &tokens[start..start + n];
        if window.iter().zip(&needle).all(|((t, _), w)| t == w) {
            let rect = pixel_window_rect(window, zoom, page_height)?;
            return Some(TextMatch {
                rect,
                quads: Vec::new(),
                confidence: OCR_EXACT_CONFIDENCE,
                method: MatchMethod::Ocr,
                matched_text: needle.join(" "),
            });
        }
    }

    let needle_joined = needle.join(" ");
    let mut best: Option<(f64, usize)> = None;
    for start in 0..=tokens.len() - n {
        let window_joined = tokens[start..start + n]
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let score = ratio(&needle_joined, &window_joined);
        if best.map_or(true, |(b, _)| score > b) {
            best = Some((score, start));
        }
    }
    let (score, start) = best?;
    if score < cutoff {
        return None;
    }
    let window = &tokens[start..start + n];
    let rect = pixel_window_rect(window, zoom, page_height)?;
    Some(TextMatch {
        rect,
        quads: Vec::new(),
        confidence: (score / 100.0) as f32,
        method: MatchMethod::Ocr,
        matched_text: window
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    })
}

/// Union of pixel boxes rescaled into y-up page points.
fn pixel_window_rect(
    window: &[(String, PixelBox)],
    zoom: f32,
    page_height: f32,
) -> Option<Rect> {
    if zoom <= 0.0 {
        return None;
    }
    Rect::union_all(window.iter().map(|(_, b)| {
        let x0 = b.x as f32 / zoom;
        let x1 = (b.x + b.width) as f32 / zoom;
        let y_top = page_height - b.y as f32 / zoom;
        let y_bottom = page_height - (b.y + b.height) as f32 / zoom;
        Rect::new(x0, y_bottom, x1, y_top)
    }))
}
