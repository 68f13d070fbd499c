//! The machine-readable quality report written next to the annotated
//! document.
//!
//! The report never fails a run by itself. Low success rates, OCR-heavy
//! documents, and drifting snippets surface as warnings for a human to
//! read, not as errors.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::classify::PageType;
use crate::render::AnnotationResult;

/// Snippets in the failed-items list are cut to this many characters.
const FAILED_SNIPPET_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationStatistics {
    pub total_items: usize,
    pub annotated: usize,
    pub failed: usize,
    /// `annotated / total_items`; 0.0 for an empty run.
    pub success_rate: f32,
    /// Successful annotations per location method.
    pub by_method: BTreeMap<String, usize>,
    /// Successful annotations per page classification.
    pub by_page_type: BTreeMap<String, usize>,
    /// Visual clusters counted during rendering, summed over pages.
    pub overlap_groups: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub page_number: u32,
    pub page_type: PageType,
    pub total: usize,
    pub annotated: usize,
    pub failed: usize,
}

impl PageSummary {
    pub fn from_results(
        page_number: u32,
        page_type: PageType,
        results: &[AnnotationResult],
    ) -> Self {
        let total = results.len();
        let annotated = results.iter().filter(|r| r.success).count();
        Self { page_number, page_type, total, annotated, failed: total - annotated }
    }
}

/// One unannotated item, with enough context to chase it by hand.
#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub field_path: String,
    pub page_number: u32,
    pub text_snippet: String,
    pub reason: String,
}

impl FailedItem {
    fn from_result(result: &AnnotationResult) -> Option<Self> {
        if result.success {
            return None;
        }
        Some(Self {
            field_path: result.field_path.clone(),
            page_number: result.page_number,
            text_snippet: truncate_snippet(&result.text_snippet),
            reason: result
                .error
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationReport {
    pub run_id: String,
    pub generated_at: String,
    pub source_path: String,
    pub output_path: String,
    /// Whether the annotated document was produced and saved.
    pub success: bool,
    pub statistics: AnnotationStatistics,
    pub pages: Vec<PageSummary>,
    pub failed_items: Vec<FailedItem>,
    pub bookmark_count: usize,
    pub warnings: Vec<String>,
}

pub struct ReportBuilder {
    source_path: String,
    output_path: String,
    min_success_rate: f32,
}

impl ReportBuilder {
    pub fn new(
        source_path: impl Into<String>,
        output_path: impl Into<String>,
        min_success_rate: f32,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            output_path: output_path.into(),
            min_success_rate,
        }
    }

    pub fn build(
        &self,
        document_success: bool,
        results: &[AnnotationResult],
        pages: Vec<PageSummary>,
        overlap_groups: usize,
        bookmark_count: usize,
    ) -> AnnotationReport {
        let statistics = compute_statistics(results, &pages, overlap_groups);
        let warnings = warnings_for(&statistics, self.min_success_rate);
        let failed_items = results.iter().filter_map(FailedItem::from_result).collect();
        AnnotationReport {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            source_path: self.source_path.clone(),
            output_path: self.output_path.clone(),
            success: document_success,
            statistics,
            pages,
            failed_items,
            bookmark_count,
            warnings,
        }
    }
}

pub fn compute_statistics(
    results: &[AnnotationResult],
    pages: &[PageSummary],
    overlap_groups: usize,
) -> AnnotationStatistics {
    let total_items = results.len();
    let annotated = results.iter().filter(|r| r.success).count();
    let success_rate = if total_items == 0 {
        0.0
    } else {
        annotated as f32 / total_items as f32
    };

    let mut by_method: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        if let Some(method) = result.method {
            *by_method.entry(method.as_str().to_string()).or_default() += 1;
        }
    }
    let mut by_page_type: BTreeMap<String, usize> = BTreeMap::new();
    for page in pages {
        *by_page_type
            .entry(page.page_type.as_str().to_string())
            .or_default() += page.annotated;
    }

    AnnotationStatistics {
        total_items,
        annotated,
        failed: total_items - annotated,
        success_rate,
        by_method,
        by_page_type,
        overlap_groups,
    }
}

/// Advisory warnings. All three comparisons are strict: landing exactly on
/// a boundary is acceptable.
pub fn warnings_for(stats: &AnnotationStatistics, min_success_rate: f32) -> Vec<String> {
    let mut warnings = Vec::new();
    if stats.total_items > 0 && stats.success_rate < min_success_rate {
        warnings.push(format!(
            "Success rate {:.1}% is below the minimum of {:.1}%",
            f64::from(stats.success_rate) * 100.0,
            f64::from(min_success_rate) * 100.0
        ));
    }
    if stats.annotated > 0 {
        let ocr = stats.by_method.get("ocr").copied().unwrap_or(0);
        if ocr * 2 > stats.annotated {
            warnings.push(format!(
                "{ocr} of {} annotations needed OCR; the document may be largely scanned",
                stats.annotated
            ));
        }
        let exact = stats.by_method.get("exact").copied().unwrap_or(0);
        if exact * 10 < stats.annotated * 3 {
            warnings.push(format!(
                "Only {exact} of {} annotations matched exactly; extracted snippets may drift from the source text",
                stats.annotated
            ));
        }
    }
    warnings
}

/// Pretty-printed JSON on disk.
pub fn write_json(report: &AnnotationReport, path: &Path) -> io::Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

fn truncate_snippet(snippet: &str) -> String {
    if snippet.chars().count() <= FAILED_SNIPPET_CHARS {
        return snippet.to_string();
    }
    let cut: String = snippet.chars().take(FAILED_SNIPPET_CHARS).collect();
    format!("{cut}...")
}
