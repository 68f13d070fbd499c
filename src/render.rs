//! Annotation rendering: turns located matches into highlight, overlay, and
//! note annotations on the sink, and reports a per-item outcome either way.
//!
//! Every match is drawn. Overlap clustering orders the page's statistics,
//! never the drawing: two stacked matches still get two annotations so
//! neither provenance trail disappears.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, warn};

use crate::classify::PageType;
use crate::config::AnnotatorConfig;
use crate::document::{AnnotationSink, DocumentError};
use crate::geometry::{Quad, Rect, Rgb};
use crate::locate::{MatchMethod, TextMatch};
use crate::provenance::ProvenanceItem;

/// Matches whose rectangles overlap at least this much (intersection over
/// the smaller area) count as one visual cluster.
pub const OVERLAP_CLUSTER_RATIO: f32 = 0.5;

/// Sticky-note icon geometry on image-based pages.
const NOTE_SIZE: f32 = 20.0;
const NOTE_GAP: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Highlight,
    RectOverlay,
}

/// Outcome of one provenance item, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationResult {
    pub page_number: u32,
    pub field_path: String,
    pub field_name: String,
    pub module_name: String,
    pub text_snippet: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<MatchMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<AnnotationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnnotationResult {
    pub fn failure(item: &ProvenanceItem, reason: impl Into<String>) -> Self {
        Self {
            page_number: item.page_number,
            field_path: item.field_path.clone(),
            field_name: item.field_name.clone(),
            module_name: item.module_name.clone(),
            text_snippet: item.text_snippet.clone(),
            success: false,
            method: None,
            confidence: None,
            kind: None,
            error: Some(reason.into()),
        }
    }

    fn located(item: &ProvenanceItem, m: &TextMatch, kind: AnnotationKind) -> Self {
        Self {
            page_number: item.page_number,
            field_path: item.field_path.clone(),
            field_name: item.field_name.clone(),
            module_name: item.module_name.clone(),
            text_snippet: item.text_snippet.clone(),
            success: true,
            method: Some(m.method),
            confidence: Some(m.confidence),
            kind: Some(kind),
            error: None,
        }
    }
}

/// What one page's rendering produced.
#[derive(Debug)]
pub struct PageRenderOutcome {
    pub results: Vec<AnnotationResult>,
    /// Visual clusters after overlap grouping.
    pub clusters: usize,
}

pub struct AnnotationRenderer {
    highlight_color: Rgb,
    highlight_opacity: f32,
    stroke_color: Rgb,
    stroke_width: f32,
}

impl AnnotationRenderer {
    pub fn new(config: &AnnotatorConfig) -> Self {
        Self {
            highlight_color: config.highlight_color,
            highlight_opacity: config.highlight_opacity,
            stroke_color: config.stroke_color,
            stroke_width: config.stroke_width,
        }
    }

    /// Draws every located match on one page in reading order. A sink
    /// failure fails that item alone; the rest of the page still renders.
    pub fn annotate_page(
        &self,
        page_number: u32,
        located: &[(ProvenanceItem, TextMatch)],
        page_type: PageType,
        sink: &mut dyn AnnotationSink,
    ) -> PageRenderOutcome {
        let mut ordered: Vec<&(ProvenanceItem, TextMatch)> = located.iter().collect();
        ordered.sort_by(|a, b| reading_order(&a.1.rect, &b.1.rect));
        let clusters = count_clusters(ordered.iter().map(|(_, m)| m.rect));
        debug!(
            page = page_number,
            matches = ordered.len(),
            clusters,
            page_type = %page_type,
            "rendering page annotations"
        );

        let mut results = Vec::with_capacity(ordered.len());
        for (item, m) in ordered {
            match self.render_one(page_number, item, m, page_type, sink) {
                Ok(kind) => results.push(AnnotationResult::located(item, m, kind)),
                Err(e) => {
                    warn!(
                        page = page_number,
                        field = %item.field_path,
                        error = %e,
                        "annotation write failed"
                    );
                    results.push(AnnotationResult::failure(
                        item,
                        format!("annotation write failed: {e}"),
                    ));
                }
            }
        }
        PageRenderOutcome { results, clusters }
    }

    fn render_one(
        &self,
        page_number: u32,
        item: &ProvenanceItem,
        m: &TextMatch,
        page_type: PageType,
        sink: &mut dyn AnnotationSink,
    ) -> Result<AnnotationKind, DocumentError> {
        let contents = popup_contents(item, m);
        if page_type.is_text_capable() {
            let fallback;
            let quads: &[Quad] = if m.quads.is_empty() {
                fallback = [Quad::from_rect(&m.rect)];
                &fallback
            } else {
                &m.quads
            };
            sink.add_highlight(
                page_number,
                m.rect,
                quads,
                self.highlight_color,
                self.highlight_opacity,
                &contents,
            )?;
            Ok(AnnotationKind::Highlight)
        } else {
            sink.add_overlay(
                page_number,
                m.rect,
                self.highlight_color,
                self.stroke_color,
                self.stroke_width,
                self.highlight_opacity,
                &contents,
            )?;
            sink.add_note(page_number, note_anchor(&m.rect), self.stroke_color, &contents)?;
            Ok(AnnotationKind::RectOverlay)
        }
    }
}

/// Reading order in y-up coordinates: higher tops first, then left to right.
fn reading_order(a: &Rect, b: &Rect) -> Ordering {
    b.top()
        .partial_cmp(&a.top())
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.x0.partial_cmp(&b.x0).unwrap_or(Ordering::Equal))
}

/// Greedy pass over reading-ordered rects. A rect joins the current cluster
/// when it overlaps the cluster's most recent rect by at least
/// [`OVERLAP_CLUSTER_RATIO`].
fn count_clusters<I: IntoIterator<Item = Rect>>(rects: I) -> usize {
    let mut clusters = 0usize;
    let mut last: Option<Rect> = None;
    for rect in rects {
        let joined =
            last.map_or(false, |prev| prev.overlap_ratio(&rect) >= OVERLAP_CLUSTER_RATIO);
        if !joined {
            clusters += 1;
        }
        last = Some(rect);
    }
    clusters
}

/// Icon rectangle hugging the overlay's top-right corner from outside.
fn note_anchor(rect: &Rect) -> Rect {
    Rect::new(
        rect.x1 + NOTE_GAP,
        rect.y1 - NOTE_SIZE,
        rect.x1 + NOTE_GAP + NOTE_SIZE,
        rect.y1,
    )
}

/// Popup text shown when the reader opens an annotation.
pub fn popup_contents(item: &ProvenanceItem, m: &TextMatch) -> String {
    let mut s = format!(
        "Field: {}\nModule: {}\nPath: {}\n",
        item.field_name, item.module_name, item.field_path
    );
    if let Some(section) = &item.section_number {
        s.push_str(&format!("Section: {section}\n"));
    }
    s.push_str(&format!(
        "Method: {}\nConfidence: {:.0}%",
        m.method,
        f64::from(m.confidence) * 100.0
    ));
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MockDocumentWriter;

    fn item(name: &str) -> ProvenanceItem {
        ProvenanceItem {
            field_path: format!("{name}.provenance"),
            field_name: name.to_string(),
            module_name: "Eligibility".into(),
            page_number: 4,
            text_snippet: format!("snippet for {name}"),
            section_number: None,
        }
    }

    fn hit(rect: Rect, quads: usize) -> TextMatch {
        TextMatch {
            rect,
            quads: vec![Quad::from_rect(&rect); quads],
            confidence: 0.95,
            method: MatchMethod::Normalized,
            matched_text: "matched".into(),
        }
    }

    fn renderer() -> AnnotationRenderer {
        AnnotationRenderer::new(&AnnotatorConfig::default())
    }

    // ── ordering and clustering ──

    #[test]
    fn matches_render_in_reading_order() {
        let top_left = (item("top_left"), hit(Rect::new(72.0, 700.0, 200.0, 712.0), 1));
        let top_right = (item("top_right"), hit(Rect::new(220.0, 700.0, 300.0, 712.0), 1));
        let lower = (item("lower"), hit(Rect::new(72.0, 650.0, 200.0, 662.0), 1));

        let mut sink = MockDocumentWriter::new();
        let outcome = renderer().annotate_page(
            4,
            &[lower.clone(), top_right.clone(), top_left.clone()],
            PageType::TextBased,
            &mut sink,
        );
        assert_eq!(outcome.results.len(), 3);
        let order: Vec<&str> = sink
            .highlights
            .iter()
            .map(|h| h.contents.lines().next().unwrap())
            .collect();
        assert_eq!(
            order,
            vec!["Field: top_left", "Field: top_right", "Field: lower"]
        );
    }

    #[test]
    fn half_overlapping_rects_share_a_cluster_but_both_render() {
        // 50x10 of each 100x10 rect overlaps: ratio exactly 0.5.
        let a = (item("a"), hit(Rect::new(0.0, 0.0, 100.0, 10.0), 1));
        let b = (item("b"), hit(Rect::new(50.0, 0.0, 150.0, 10.0), 1));
        let mut sink = MockDocumentWriter::new();
        let outcome =
            renderer().annotate_page(4, &[a, b], PageType::TextBased, &mut sink);
        assert_eq!(outcome.clusters, 1);
        assert_eq!(sink.highlights.len(), 2);
    }

    #[test]
    fn just_under_half_overlap_stays_two_clusters() {
        let a = (item("a"), hit(Rect::new(0.0, 0.0, 100.0, 10.0), 1));
        let b = (item("b"), hit(Rect::new(51.0, 0.0, 151.0, 10.0), 1));
        let mut sink = MockDocumentWriter::new();
        let outcome =
            renderer().annotate_page(4, &[a, b], PageType::TextBased, &mut sink);
        assert_eq!(outcome.clusters, 2);
        assert_eq!(sink.highlights.len(), 2);
    }

    // ── annotation kinds ──

    #[test]
    fn text_pages_get_highlights_with_quads() {
        let rect = Rect::new(72.0, 700.0, 200.0, 712.0);
        let two_line = (item("criteria"), hit(rect, 2));
        let mut sink = MockDocumentWriter::new();
        let outcome =
            renderer().annotate_page(4, &[two_line], PageType::Mixed, &mut sink);
        assert_eq!(sink.highlights.len(), 1);
        assert_eq!(sink.highlights[0].quad_count, 2);
        assert_eq!(outcome.results[0].kind, Some(AnnotationKind::Highlight));
        assert!(outcome.results[0].success);
    }

    #[test]
    fn quadless_match_falls_back_to_rect_quad() {
        let aggregate = (item("aggregate"), hit(Rect::new(72.0, 650.0, 540.0, 712.0), 0));
        let mut sink = MockDocumentWriter::new();
        renderer().annotate_page(4, &[aggregate], PageType::TextBased, &mut sink);
        assert_eq!(sink.highlights[0].quad_count, 1);
    }

    #[test]
    fn image_pages_get_overlay_and_note() {
        let rect = Rect::new(100.0, 500.0, 300.0, 560.0);
        let scanned = (item("scanned"), hit(rect, 0));
        let mut sink = MockDocumentWriter::new();
        let outcome =
            renderer().annotate_page(4, &[scanned], PageType::ImageBased, &mut sink);
        assert!(sink.highlights.is_empty());
        assert_eq!(sink.overlays.len(), 1);
        assert_eq!(sink.notes.len(), 1);
        assert_eq!(outcome.results[0].kind, Some(AnnotationKind::RectOverlay));

        // The note hugs the overlay's top-right corner.
        let note = sink.notes[0].rect;
        assert!(note.x0 > rect.x1);
        assert!((note.y1 - rect.y1).abs() < 1e-6);
    }

    // ── per-item failure capture ──

    #[test]
    fn sink_failures_fail_the_item_not_the_page() {
        let a = (item("a"), hit(Rect::new(0.0, 700.0, 100.0, 712.0), 1));
        let b = (item("b"), hit(Rect::new(0.0, 650.0, 100.0, 662.0), 1));
        let mut sink = MockDocumentWriter::new();
        sink.fail_highlights = true;
        let outcome =
            renderer().annotate_page(4, &[a, b], PageType::TextBased, &mut sink);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| !r.success));
        assert!(outcome.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("annotation write failed"));
        assert!(sink.highlights.is_empty());
    }

    // ── popup template ──

    #[test]
    fn popup_contents_follow_the_template() {
        let mut it = item("inclusion[0]");
        it.section_number = Some("4.1".into());
        let m = hit(Rect::new(0.0, 0.0, 10.0, 10.0), 1);
        let text = popup_contents(&it, &m);
        assert_eq!(
            text,
            "Field: inclusion[0]\nModule: Eligibility\nPath: inclusion[0].provenance\n\
             Section: 4.1\nMethod: normalized\nConfidence: 95%"
        );

        let without = popup_contents(&item("x"), &m);
        assert!(!without.contains("Section:"));
        assert!(without.ends_with("Confidence: 95%"));
    }
}
