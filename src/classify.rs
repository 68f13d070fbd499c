//! Page classification: decides how a page should be annotated and whether
//! locating text on it requires OCR.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::DocumentReader;
use crate::page::PageSnapshot;

/// Pages with at least this many extracted characters count as text-bearing.
const MIN_TEXT_LEN: usize = 50;
/// Characters of text expected per image before a mixed page looks image-heavy.
const CHARS_PER_IMAGE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    TextBased,
    ImageBased,
    Mixed,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextBased => "text_based",
            Self::ImageBased => "image_based",
            Self::Mixed => "mixed",
        }
    }

    /// Whether native text search can run on this page at all.
    pub fn is_text_capable(&self) -> bool {
        !matches!(self, Self::ImageBased)
    }

    /// Whether locating text here needs rasterization plus OCR.
    pub fn requires_ocr(&self) -> bool {
        matches!(self, Self::ImageBased)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageClassification {
    pub page_type: PageType,
    pub confidence: f32,
    pub text_length: usize,
    pub image_count: usize,
}

/// The decision table over `(text_length, image_count)`.
///
/// - enough text, no images: text-based, certain;
/// - enough text plus images: mixed, confidence scales with how much text
///   each image is balanced by (capped at 1.0);
/// - little text with images: image-based, near-certain;
/// - little text and no images: image-based at lower confidence (blank page
///   or vector-drawn content that still may rasterize to readable text).
pub fn classify_counts(text_length: usize, image_count: usize) -> PageClassification {
    let (page_type, confidence) = if text_length >= MIN_TEXT_LEN {
        if image_count == 0 {
            (PageType::TextBased, 1.0)
        } else {
            let ratio = text_length as f32 / (image_count * CHARS_PER_IMAGE) as f32;
            (PageType::Mixed, ratio.min(1.0))
        }
    } else if image_count > 0 {
        (PageType::ImageBased, 0.9)
    } else {
        (PageType::ImageBased, 0.7)
    };
    PageClassification {
        page_type,
        confidence,
        text_length,
        image_count,
    }
}

/// Classifies pages and memoizes the result per page index.
#[derive(Debug, Default)]
pub struct PageClassifier {
    cache: HashMap<usize, PageClassification>,
}

impl PageClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, snap: &PageSnapshot) -> PageClassification {
        if let Some(hit) = self.cache.get(&snap.page_index) {
            return *hit;
        }
        let classification = classify_counts(snap.text_length(), snap.image_count);
        debug!(
            page = snap.page_number,
            page_type = %classification.page_type,
            confidence = classification.confidence,
            text_length = classification.text_length,
            image_count = classification.image_count,
            "page classified"
        );
        self.cache.insert(snap.page_index, classification);
        classification
    }

    /// Classifies a batch of 1-based page numbers. Out-of-range numbers are
    /// skipped with a warning; snapshot failures skip the page likewise.
    pub fn classify_pages(
        &mut self,
        reader: &dyn DocumentReader,
        pages: &[u32],
    ) -> BTreeMap<u32, PageClassification> {
        let mut out = BTreeMap::new();
        for &page in pages {
            if page == 0 || page as usize > reader.page_count() {
                warn!(page, pages = reader.page_count(), "page out of range, not classified");
                continue;
            }
            let index = page as usize - 1;
            if let Some(hit) = self.cache.get(&index) {
                out.insert(page, *hit);
                continue;
            }
            match reader.snapshot(index) {
                Ok(snap) => {
                    out.insert(page, self.classify(&snap));
                }
                Err(e) => warn!(page, error = %e, "snapshot failed, page not classified"),
            }
        }
        out
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MockDocumentReader;

    // ── decision table ──

    #[test]
    fn plenty_of_text_without_images_is_text_based() {
        let c = classify_counts(500, 0);
        assert_eq!(c.page_type, PageType::TextBased);
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn text_with_images_is_mixed_with_scaled_confidence() {
        let c = classify_counts(300, 3);
        assert_eq!(c.page_type, PageType::Mixed);
        assert!((c.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mixed_confidence_boundary_cases() {
        // 200 chars balancing one image caps confidence at 1.0.
        let at_cap = classify_counts(200, 1);
        assert_eq!(at_cap.page_type, PageType::Mixed);
        assert_eq!(at_cap.confidence, 1.0);
        // Half the balancing text gives exactly 0.5.
        let half = classify_counts(100, 1);
        assert!((half.confidence - 0.5).abs() < 1e-6);
        // Overshooting text still caps at 1.0.
        assert_eq!(classify_counts(10_000, 2).confidence, 1.0);
    }

    #[test]
    fn sparse_text_with_images_is_image_based() {
        let c = classify_counts(10, 2);
        assert_eq!(c.page_type, PageType::ImageBased);
        assert!((c.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn blank_or_vector_page_is_image_based_low_confidence() {
        let c = classify_counts(0, 0);
        assert_eq!(c.page_type, PageType::ImageBased);
        assert!((c.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn threshold_edges() {
        assert_eq!(classify_counts(50, 0).page_type, PageType::TextBased);
        assert_eq!(classify_counts(49, 0).page_type, PageType::ImageBased);
        assert_eq!(classify_counts(50, 1).page_type, PageType::Mixed);
        assert_eq!(classify_counts(49, 1).page_type, PageType::ImageBased);
    }

    #[test]
    fn capability_flags_follow_type() {
        assert!(PageType::TextBased.is_text_capable());
        assert!(PageType::Mixed.is_text_capable());
        assert!(!PageType::ImageBased.is_text_capable());
        assert!(PageType::ImageBased.requires_ocr());
        assert!(!PageType::Mixed.requires_ocr());
    }

    // ── cache behavior ──

    #[test]
    fn classification_is_deterministic_and_cached() {
        let snap = PageSnapshot::from_lines(
            0,
            &["enough text to clear the fifty character threshold easily"],
        );
        let mut classifier = PageClassifier::new();
        let first = classifier.classify(&snap);
        let second = classifier.classify(&snap);
        assert_eq!(first, second);
        assert_eq!(classifier.cached_pages(), 1);

        classifier.clear_cache();
        assert_eq!(classifier.cached_pages(), 0);
        assert_eq!(classifier.classify(&snap), first);
    }

    #[test]
    fn classify_pages_skips_out_of_range_numbers() {
        let reader = MockDocumentReader::new(vec![
            PageSnapshot::from_lines(0, &["a page with more than enough text to be text based"]),
            PageSnapshot::from_lines(1, &["short"]).with_images(1),
        ]);
        let mut classifier = PageClassifier::new();
        let result = classifier.classify_pages(&reader, &[0, 1, 2, 9]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[&1].page_type, PageType::TextBased);
        assert_eq!(result[&2].page_type, PageType::ImageBased);
        assert_eq!(classifier.cached_pages(), 2);
    }
}
