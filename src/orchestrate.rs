//! The end-to-end annotation run: collect provenance, classify and process
//! each page, write bookmarks and metadata, save, and report.
//!
//! Only two moments can fail a whole run: opening the document and saving
//! the annotated copy. Everything in between degrades per item or per page
//! and lands in the report instead.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify::PageClassifier;
use crate::config::{AnnotatorConfig, ConfigError, APP_NAME, APP_VERSION};
use crate::document::{
    BookmarkNode, DocumentError, DocumentMetadata, DocumentReader, DocumentWriter, LopdfWriter,
    PdfiumReader,
};
use crate::locate::{OcrEngine, TextLocator, TextMatch};
use crate::provenance::{self, ProvenanceCollector, ProvenanceItem};
use crate::render::{AnnotationRenderer, AnnotationResult};
use crate::report::{self, AnnotationReport, PageSummary, ReportBuilder};

/// Field names shown on a page bookmark before collapsing into a count.
const BOOKMARK_FIELDS_SHOWN: usize = 3;

/// Failure reason for image-based pages when no OCR engine is wired in.
pub const REASON_OCR_REQUIRED: &str = "Image-based page requires OCR";
/// Failure reason when the whole cascade comes up empty.
pub const REASON_NO_MATCH: &str = "No match found";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no provenance records found in the extracted facts")]
    NoProvenance,
    #[error("extracted facts are not valid JSON: {0}")]
    Facts(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse run phases, logged as each begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Collecting,
    Opening,
    Processing,
    Bookmarking,
    Saving,
    Reporting,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Opening => "opening",
            Self::Processing => "processing",
            Self::Bookmarking => "bookmarking",
            Self::Saving => "saving",
            Self::Reporting => "reporting",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct AnnotationEngine {
    config: AnnotatorConfig,
    locator: TextLocator,
    renderer: AnnotationRenderer,
}

impl AnnotationEngine {
    pub fn new(config: AnnotatorConfig, ocr: Option<Box<dyn OcrEngine + Send + Sync>>) -> Self {
        let locator = TextLocator::new(&config, ocr);
        let renderer = AnnotationRenderer::new(&config);
        Self { config, locator, renderer }
    }

    /// Whole run against files on disk: PDFium for reading, lopdf for
    /// writing, plus the JSON report when a path is given.
    pub fn run_files(
        &self,
        source: &Path,
        facts_path: &Path,
        output: &Path,
        report_path: Option<&Path>,
    ) -> Result<AnnotationReport, EngineError> {
        let raw = std::fs::read_to_string(facts_path)?;
        let facts: Value =
            serde_json::from_str(&raw).map_err(|e| EngineError::Facts(e.to_string()))?;

        info!(phase = %Phase::Opening, source = %source.display(), "opening document");
        let reader = PdfiumReader::open(source)?;
        let mut writer = LopdfWriter::open(source)?;

        let report = self.run(&reader, &mut writer, &facts, source, output)?;
        if let Some(path) = report_path {
            info!(phase = %Phase::Reporting, path = %path.display(), "writing report");
            report::write_json(&report, path)?;
        }
        Ok(report)
    }

    /// The run itself, against already-open read and write capabilities.
    pub fn run<W: DocumentWriter>(
        &self,
        reader: &dyn DocumentReader,
        writer: &mut W,
        facts: &Value,
        source_path: &Path,
        output_path: &Path,
    ) -> Result<AnnotationReport, EngineError> {
        info!(phase = %Phase::Collecting, "collecting provenance records");
        let found = ProvenanceCollector::new().collect(facts);
        let total_found = found.len();
        let items = provenance::dedup(found);
        if items.is_empty() {
            return Err(EngineError::NoProvenance);
        }
        let stats = provenance::collection_stats(total_found, &items);
        info!(
            found = stats.total_found,
            unique = stats.unique_after_dedup,
            pages = stats.pages_covered,
            "provenance collected"
        );

        info!(
            phase = %Phase::Processing,
            document_pages = reader.page_count(),
            provenance_pages = stats.pages_covered,
            "processing pages"
        );
        let by_page = provenance::group_by_page(&items);
        let mut classifier = PageClassifier::new();
        let mut all_results: Vec<AnnotationResult> = Vec::new();
        let mut page_summaries: Vec<PageSummary> = Vec::new();
        let mut overlap_groups = 0usize;
        let page_count = reader.page_count();

        for (&page_number, page_items) in &by_page {
            if page_number as usize > page_count {
                warn!(page = page_number, pages = page_count, "page out of range, items failed");
                for item in page_items {
                    all_results.push(AnnotationResult::failure(
                        item,
                        format!("Page {page_number} out of range ({page_count} pages)"),
                    ));
                }
                continue;
            }
            let index = page_number as usize - 1;
            let snap = match reader.snapshot(index) {
                Ok(snap) => snap,
                Err(e) => {
                    warn!(page = page_number, error = %e, "snapshot failed, items failed");
                    for item in page_items {
                        all_results
                            .push(AnnotationResult::failure(item, format!("Cannot read page: {e}")));
                    }
                    continue;
                }
            };
            let page_type = classifier.classify(&snap).page_type;

            if page_type.requires_ocr() && !self.locator.has_ocr() {
                let page_results: Vec<AnnotationResult> = page_items
                    .iter()
                    .map(|item| AnnotationResult::failure(item, REASON_OCR_REQUIRED))
                    .collect();
                page_summaries.push(PageSummary::from_results(page_number, page_type, &page_results));
                all_results.extend(page_results);
                continue;
            }

            match writer.remove_annotations(page_number) {
                Ok(removed) if removed > 0 => {
                    debug!(page = page_number, removed, "cleared prior annotations");
                }
                Ok(_) => {}
                Err(e) => warn!(page = page_number, error = %e, "could not clear prior annotations"),
            }

            let mut located: Vec<(ProvenanceItem, TextMatch)> = Vec::new();
            let mut page_results: Vec<AnnotationResult> = Vec::new();
            for item in page_items {
                match self.locator.locate(reader, &snap, &item.text_snippet, page_type) {
                    Some(found) => located.push((item.clone(), found)),
                    None => page_results.push(AnnotationResult::failure(item, REASON_NO_MATCH)),
                }
            }
            if !located.is_empty() {
                let outcome = self.renderer.annotate_page(page_number, &located, page_type, writer);
                overlap_groups += outcome.clusters;
                page_results.extend(outcome.results);
            }
            page_summaries.push(PageSummary::from_results(page_number, page_type, &page_results));
            all_results.extend(page_results);
        }

        info!(phase = %Phase::Bookmarking, "building navigation outline");
        let bookmarks = build_bookmarks(&all_results);
        let bookmark_count = match writer.add_bookmarks(&bookmarks) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "bookmark writing failed");
                0
            }
        };

        let metadata = run_metadata(source_path, &all_results, Utc::now());
        if let Err(e) = writer.set_metadata(&metadata) {
            warn!(error = %e, "metadata writing failed");
        }

        info!(phase = %Phase::Saving, path = %output_path.display(), "saving annotated document");
        writer.save_to_file(output_path)?;

        let report = ReportBuilder::new(
            source_path.display().to_string(),
            output_path.display().to_string(),
            self.config.min_success_rate,
        )
        .build(true, &all_results, page_summaries, overlap_groups, bookmark_count);
        info!(
            phase = %Phase::Done,
            annotated = report.statistics.annotated,
            failed = report.statistics.failed,
            success_rate = report.statistics.success_rate,
            warnings = report.warnings.len(),
            "annotation finished"
        );
        Ok(report)
    }
}

/// Two-level outline: module nodes with one entry per annotated page.
fn build_bookmarks(results: &[AnnotationResult]) -> Vec<BookmarkNode> {
    let mut modules: BTreeMap<String, BTreeMap<u32, Vec<String>>> = BTreeMap::new();
    for result in results.iter().filter(|r| r.success) {
        modules
            .entry(result.module_name.clone())
            .or_default()
            .entry(result.page_number)
            .or_default()
            .push(result.field_name.clone());
    }
    modules
        .into_iter()
        .map(|(module, pages)| {
            let children = pages
                .into_iter()
                .map(|(page, fields)| BookmarkNode::page(page_title(page, &fields), page))
                .collect();
            BookmarkNode::group(module, children)
        })
        .collect()
}

fn page_title(page: u32, fields: &[String]) -> String {
    let shown: Vec<&str> = fields
        .iter()
        .take(BOOKMARK_FIELDS_SHOWN)
        .map(String::as_str)
        .collect();
    let mut title = format!("Page {page}: {}", shown.join(", "));
    if fields.len() > BOOKMARK_FIELDS_SHOWN {
        title.push_str(&format!(" +{} more", fields.len() - BOOKMARK_FIELDS_SHOWN));
    }
    title
}

fn run_metadata(
    source_path: &Path,
    results: &[AnnotationResult],
    now: DateTime<Utc>,
) -> DocumentMetadata {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let mut modules: Vec<&str> = results
        .iter()
        .filter(|r| r.success)
        .map(|r| r.module_name.as_str())
        .collect();
    modules.sort_unstable();
    modules.dedup();
    DocumentMetadata {
        title: Some(format!("{stem} (provenance annotated)")),
        subject: Some("Source-anchored annotations for machine-extracted facts".to_string()),
        keywords: Some(modules.join(", ")),
        producer: Some(format!("{APP_NAME} {APP_VERSION}")),
        modified: Some(pdf_mod_date(now)),
    }
}

/// PDF date string, `D:YYYYMMDDHHmmSSZ`.
fn pdf_mod_date(now: DateTime<Utc>) -> String {
    format!("D:{}Z", now.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MockDocumentReader, MockDocumentWriter};
    use crate::page::PageSnapshot;
    use chrono::TimeZone;
    use serde_json::json;

    fn engine() -> AnnotationEngine {
        AnnotationEngine::new(AnnotatorConfig::default(), None)
    }

    fn two_page_reader() -> MockDocumentReader {
        MockDocumentReader::new(vec![
            PageSnapshot::from_lines(
                0,
                &["inclusion criteria require age eighteen and informed consent today"],
            ),
            PageSnapshot::from_lines(
                1,
                &["the primary endpoint overall survival was measured over twenty four months"],
            ),
        ])
    }

    fn two_item_facts() -> Value {
        json!({
            "eligibility_criteria": {
                "inclusion": [
                    { "provenance": { "page_number": 1, "text_snippet": "inclusion criteria require age eighteen" } }
                ]
            },
            "endpoints": {
                "primary": { "provenance": { "page_number": 2, "text_snippet": "primary endpoint overall survival" } }
            }
        })
    }

    // ── whole runs against mocks ──

    #[test]
    fn full_run_annotates_bookmarks_and_saves() {
        let reader = two_page_reader();
        let mut writer = MockDocumentWriter::new();
        let report = engine()
            .run(
                &reader,
                &mut writer,
                &two_item_facts(),
                Path::new("protocol.pdf"),
                Path::new("protocol.annotated.pdf"),
            )
            .unwrap();

        assert!(report.success);
        assert_eq!(report.statistics.total_items, 2);
        assert_eq!(report.statistics.annotated, 2);
        assert!(report.warnings.is_empty());
        assert_eq!(writer.highlights.len(), 2);
        assert_eq!(writer.removed_pages, vec![1, 2]);
        assert_eq!(writer.saved_to.as_deref(), Some(Path::new("protocol.annotated.pdf")));

        // One module node per section, one page entry each.
        assert_eq!(report.bookmark_count, 2);
        let titles: Vec<&str> = writer.bookmarks.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Eligibility", "Endpoints"]);
        assert_eq!(writer.bookmarks[0].children[0].title, "Page 1: inclusion[0]");

        let metadata = writer.metadata.unwrap();
        assert_eq!(metadata.producer.as_deref(), Some("provmark 0.3.0"));
        assert!(metadata.title.unwrap().starts_with("protocol"));
    }

    #[test]
    fn empty_facts_tree_refuses_to_run() {
        let reader = two_page_reader();
        let mut writer = MockDocumentWriter::new();
        let err = engine()
            .run(&reader, &mut writer, &json!({}), Path::new("a.pdf"), Path::new("b.pdf"))
            .unwrap_err();
        assert!(matches!(err, EngineError::NoProvenance));
        assert!(writer.saved_to.is_none());
    }

    #[test]
    fn image_page_without_ocr_fails_items_but_still_saves() {
        let reader = MockDocumentReader::new(vec![
            PageSnapshot::from_lines(0, &["short"]).with_images(1),
        ]);
        let mut writer = MockDocumentWriter::new();
        let facts = json!({
            "scan": { "provenance": { "page_number": 1, "text_snippet": "anything long enough here" } }
        });
        let report = engine()
            .run(&reader, &mut writer, &facts, Path::new("a.pdf"), Path::new("b.pdf"))
            .unwrap();

        assert!(report.success);
        assert_eq!(report.statistics.annotated, 0);
        assert_eq!(report.statistics.failed, 1);
        assert_eq!(report.failed_items[0].reason, "Image-based page requires OCR");
        assert!(writer.saved_to.is_some());
        assert!(writer.highlights.is_empty());
    }

    #[test]
    fn out_of_range_page_fails_its_items_and_continues() {
        let reader = two_page_reader();
        let mut writer = MockDocumentWriter::new();
        let facts = json!({
            "eligibility_criteria": {
                "inclusion": [
                    { "provenance": { "page_number": 1, "text_snippet": "inclusion criteria require age eighteen" } }
                ]
            },
            "orphan": { "provenance": { "page_number": 9, "text_snippet": "refers to a missing page" } }
        });
        let report = engine()
            .run(&reader, &mut writer, &facts, Path::new("a.pdf"), Path::new("b.pdf"))
            .unwrap();

        assert_eq!(report.statistics.annotated, 1);
        assert_eq!(report.statistics.failed, 1);
        assert!(report.failed_items[0].reason.contains("out of range"));
        assert!(writer.saved_to.is_some());
    }

    #[test]
    fn unmatched_snippet_reports_no_match() {
        let reader = two_page_reader();
        let mut writer = MockDocumentWriter::new();
        let facts = json!({
            "ghost": { "provenance": { "page_number": 1, "text_snippet": "zebra quagga nonsense wording" } }
        });
        let report = engine()
            .run(&reader, &mut writer, &facts, Path::new("a.pdf"), Path::new("b.pdf"))
            .unwrap();
        assert_eq!(report.statistics.failed, 1);
        assert_eq!(report.failed_items[0].reason, "No match found");
    }

    #[test]
    fn save_failure_fails_the_run() {
        let reader = two_page_reader();
        let mut writer = MockDocumentWriter::new();
        writer.fail_save = true;
        let err = engine()
            .run(
                &reader,
                &mut writer,
                &two_item_facts(),
                Path::new("a.pdf"),
                Path::new("b.pdf"),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Document(DocumentError::SaveFailure(_))));
    }

    // ── bookmarks and metadata helpers ──

    #[test]
    fn page_titles_collapse_beyond_three_fields() {
        let fields: Vec<String> =
            ["dose", "route", "frequency", "duration", "taper"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            page_title(3, &fields),
            "Page 3: dose, route, frequency +2 more"
        );
        assert_eq!(page_title(1, &fields[..2].to_vec()), "Page 1: dose, route");
    }

    #[test]
    fn bookmarks_only_cover_successes() {
        let mut ok = AnnotationResult::failure(
            &ProvenanceItem {
                field_path: "a.provenance".into(),
                field_name: "a".into(),
                module_name: "Endpoints".into(),
                page_number: 2,
                text_snippet: "long enough snippet".into(),
                section_number: None,
            },
            "No match found",
        );
        ok.success = true;
        let failed = AnnotationResult::failure(
            &ProvenanceItem {
                field_path: "b.provenance".into(),
                field_name: "b".into(),
                module_name: "Safety Monitoring".into(),
                page_number: 5,
                text_snippet: "another long snippet".into(),
                section_number: None,
            },
            "No match found",
        );
        let nodes = build_bookmarks(&[ok, failed]);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].title, "Endpoints");
        assert_eq!(nodes[0].children[0].page_number, Some(2));
    }

    #[test]
    fn pdf_date_format() {
        let t = Utc.with_ymd_and_hms(2026, 8, 25, 12, 30, 45).unwrap();
        assert_eq!(pdf_mod_date(t), "D:20260825123045Z");
    }
}
