//! Document access: the read and write seams the engine works through.
//!
//! Reading and writing are separate capabilities behind traits so the
//! pipeline and its tests run against mocks. The production implementations
//! bind PDFium for reading (`pdfium`) and lopdf for writing (`writer`).
//!
//! Conventions: readers take 0-based page indexes (the library convention),
//! annotation sinks take the 1-based page numbers provenance records use.

pub mod pdfium;
pub mod writer;

pub use pdfium::PdfiumReader;
pub use writer::LopdfWriter;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::geometry::{Quad, Rect, Rgb};
use crate::page::PageSnapshot;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document cannot be read: {0}")]
    Unreadable(String),
    #[error("document is encrypted and cannot be annotated")]
    Encrypted,
    #[error("page index {index} out of range ({pages} pages)")]
    PageOutOfRange { index: usize, pages: usize },
    #[error("page rendering failed: {0}")]
    RenderFailure(String),
    #[error("annotation write failed: {0}")]
    WriteFailure(String),
    #[error("cannot save annotated document: {0}")]
    SaveFailure(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read-side capability: page count, page snapshots, rasterization.
pub trait DocumentReader {
    fn page_count(&self) -> usize;

    /// Owned snapshot of one 0-based page.
    fn snapshot(&self, page_index: usize) -> Result<PageSnapshot, DocumentError>;

    /// PNG bytes of the page rasterized at `zoom` pixels per point.
    fn render_png(&self, page_index: usize, zoom: f32) -> Result<Vec<u8>, DocumentError>;
}

/// Write-side capability for individual annotations. Object-safe so the
/// renderer can drive any sink.
pub trait AnnotationSink {
    fn add_highlight(
        &mut self,
        page_number: u32,
        rect: Rect,
        quads: &[Quad],
        color: Rgb,
        opacity: f32,
        contents: &str,
    ) -> Result<(), DocumentError>;

    fn add_overlay(
        &mut self,
        page_number: u32,
        rect: Rect,
        fill: Rgb,
        stroke: Rgb,
        stroke_width: f32,
        opacity: f32,
        contents: &str,
    ) -> Result<(), DocumentError>;

    fn add_note(
        &mut self,
        page_number: u32,
        rect: Rect,
        color: Rgb,
        contents: &str,
    ) -> Result<(), DocumentError>;

    /// Removes prior highlight, square, and note annotations from the page.
    /// Returns how many were removed.
    fn remove_annotations(&mut self, page_number: u32) -> Result<usize, DocumentError>;
}

/// Whole-document write capability on top of the per-annotation sink.
pub trait DocumentWriter: AnnotationSink {
    fn set_metadata(&mut self, metadata: &DocumentMetadata) -> Result<(), DocumentError>;

    /// Replaces the document outline. Returns how many leaf entries exist.
    fn add_bookmarks(&mut self, bookmarks: &[BookmarkNode]) -> Result<usize, DocumentError>;

    fn save_to_file(&mut self, path: &Path) -> Result<(), DocumentError>;
}

/// One outline entry. The engine emits a two-level tree: module nodes with
/// page entries beneath them.
#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkNode {
    pub title: String,
    /// 1-based target page; `None` for grouping-only nodes.
    pub page_number: Option<u32>,
    pub children: Vec<BookmarkNode>,
}

impl BookmarkNode {
    pub fn group(title: impl Into<String>, children: Vec<BookmarkNode>) -> Self {
        Self { title: title.into(), page_number: None, children }
    }

    pub fn page(title: impl Into<String>, page_number: u32) -> Self {
        Self { title: title.into(), page_number: Some(page_number), children: Vec::new() }
    }

    /// Leaf entries in this subtree.
    pub fn leaf_count(&self) -> usize {
        if self.children.is_empty() {
            1
        } else {
            self.children.iter().map(BookmarkNode::leaf_count).sum()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub producer: Option<String>,
    /// PDF date string, `D:YYYYMMDDHHmmSS`.
    pub modified: Option<String>,
}

// ---------------------------------------------------------------------------
// Mock implementations for tests and offline development
// ---------------------------------------------------------------------------

/// Serves canned snapshots; rendering returns configured PNG bytes.
#[derive(Debug, Default)]
pub struct MockDocumentReader {
    snapshots: Vec<PageSnapshot>,
    render_png: Option<Vec<u8>>,
}

impl MockDocumentReader {
    pub fn new(snapshots: Vec<PageSnapshot>) -> Self {
        Self { snapshots, render_png: None }
    }

    pub fn with_render_png(mut self, png: Vec<u8>) -> Self {
        self.render_png = Some(png);
        self
    }
}

impl DocumentReader for MockDocumentReader {
    fn page_count(&self) -> usize {
        self.snapshots.len()
    }

    fn snapshot(&self, page_index: usize) -> Result<PageSnapshot, DocumentError> {
        self.snapshots
            .get(page_index)
            .cloned()
            .ok_or(DocumentError::PageOutOfRange {
                index: page_index,
                pages: self.snapshots.len(),
            })
    }

    fn render_png(&self, page_index: usize, _zoom: f32) -> Result<Vec<u8>, DocumentError> {
        if page_index >= self.snapshots.len() {
            return Err(DocumentError::PageOutOfRange {
                index: page_index,
                pages: self.snapshots.len(),
            });
        }
        self.render_png
            .clone()
            .ok_or_else(|| DocumentError::RenderFailure("mock has no render output".into()))
    }
}

/// What a recording sink saw for one annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAnnotation {
    pub page_number: u32,
    pub rect: Rect,
    pub quad_count: usize,
    pub contents: String,
}

/// Records every write so tests can assert on exactly what was emitted.
#[derive(Debug, Default)]
pub struct MockDocumentWriter {
    pub highlights: Vec<RecordedAnnotation>,
    pub overlays: Vec<RecordedAnnotation>,
    pub notes: Vec<RecordedAnnotation>,
    pub removed_pages: Vec<u32>,
    pub bookmarks: Vec<BookmarkNode>,
    pub metadata: Option<DocumentMetadata>,
    pub saved_to: Option<PathBuf>,
    /// When set, `add_highlight` fails; exercises per-item error capture.
    pub fail_highlights: bool,
    /// When set, `save_to_file` fails; exercises document-level error paths.
    pub fail_save: bool,
}

impl MockDocumentWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnnotationSink for MockDocumentWriter {
    fn add_highlight(
        &mut self,
        page_number: u32,
        rect: Rect,
        quads: &[Quad],
        _color: Rgb,
        _opacity: f32,
        contents: &str,
    ) -> Result<(), DocumentError> {
        if self.fail_highlights {
            return Err(DocumentError::WriteFailure("mock highlight failure".into()));
        }
        self.highlights.push(RecordedAnnotation {
            page_number,
            rect,
            quad_count: quads.len(),
            contents: contents.to_string(),
        });
        Ok(())
    }

    fn add_overlay(
        &mut self,
        page_number: u32,
        rect: Rect,
        _fill: Rgb,
        _stroke: Rgb,
        _stroke_width: f32,
        _opacity: f32,
        contents: &str,
    ) -> Result<(), DocumentError> {
        self.overlays.push(RecordedAnnotation {
            page_number,
            rect,
            quad_count: 0,
            contents: contents.to_string(),
        });
        Ok(())
    }

    fn add_note(
        &mut self,
        page_number: u32,
        rect: Rect,
        _color: Rgb,
        contents: &str,
    ) -> Result<(), DocumentError> {
        self.notes.push(RecordedAnnotation {
            page_number,
            rect,
            quad_count: 0,
            contents: contents.to_string(),
        });
        Ok(())
    }

    fn remove_annotations(&mut self, page_number: u32) -> Result<usize, DocumentError> {
        self.removed_pages.push(page_number);
        Ok(0)
    }
}

impl DocumentWriter for MockDocumentWriter {
    fn set_metadata(&mut self, metadata: &DocumentMetadata) -> Result<(), DocumentError> {
        self.metadata = Some(metadata.clone());
        Ok(())
    }

    fn add_bookmarks(&mut self, bookmarks: &[BookmarkNode]) -> Result<usize, DocumentError> {
        self.bookmarks = bookmarks.to_vec();
        Ok(bookmarks.iter().map(BookmarkNode::leaf_count).sum())
    }

    fn save_to_file(&mut self, path: &Path) -> Result<(), DocumentError> {
        if self.fail_save {
            return Err(DocumentError::SaveFailure("mock save failure".into()));
        }
        self.saved_to = Some(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_reader_bounds_check() {
        let reader = MockDocumentReader::new(vec![PageSnapshot::from_lines(0, &["only page"])]);
        assert_eq!(reader.page_count(), 1);
        assert!(reader.snapshot(0).is_ok());
        assert!(matches!(
            reader.snapshot(1),
            Err(DocumentError::PageOutOfRange { index: 1, pages: 1 })
        ));
    }

    #[test]
    fn bookmark_leaf_count_walks_the_tree() {
        let tree = BookmarkNode::group(
            "Eligibility",
            vec![BookmarkNode::page("Page 4", 4), BookmarkNode::page("Page 5", 5)],
        );
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(BookmarkNode::page("Page 1", 1).leaf_count(), 1);
    }

    #[test]
    fn mock_writer_records_and_injects_failures() {
        let mut writer = MockDocumentWriter::new();
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        writer
            .add_highlight(3, rect, &[], Rgb::normalized(1.0, 0.8, 0.0), 0.4, "note")
            .unwrap();
        assert_eq!(writer.highlights.len(), 1);
        assert_eq!(writer.highlights[0].page_number, 3);

        writer.fail_highlights = true;
        assert!(writer
            .add_highlight(3, rect, &[], Rgb::normalized(1.0, 0.8, 0.0), 0.4, "note")
            .is_err());
    }
}
