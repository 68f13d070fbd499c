//! PDFium-backed document reading: char-level page snapshots and
//! rasterization for OCR.
//!
//! PDFium handles are not `Send`, so the reader keeps only the document
//! bytes and rebinds the library per operation. Pages are processed
//! sequentially, one snapshot per page.

use std::path::Path;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::debug;

use crate::geometry::Rect;
use crate::page::{PageSnapshot, WordBox};

use super::{DocumentError, DocumentReader};

/// Hard cap on either raster dimension handed to PDFium.
const MAX_RENDER_DIMENSION_PX: i32 = 4000;

pub struct PdfiumReader {
    bytes: Vec<u8>,
    pages: usize,
}

impl PdfiumReader {
    /// Loads a document from disk, failing fast on unreadable or encrypted
    /// input.
    pub fn open(path: &Path) -> Result<Self, DocumentError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DocumentError> {
        let pages = {
            let pdfium = load_pdfium()?;
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(map_load_error)?;
            document.pages().len() as usize
        };
        debug!(pages, "document opened for reading");
        Ok(Self { bytes, pages })
    }
}

impl DocumentReader for PdfiumReader {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn snapshot(&self, page_index: usize) -> Result<PageSnapshot, DocumentError> {
        if page_index >= self.pages {
            return Err(DocumentError::PageOutOfRange { index: page_index, pages: self.pages });
        }
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&self.bytes, None)
            .map_err(map_load_error)?;
        let page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| DocumentError::Unreadable(e.to_string()))?;

        let width = page.width().value;
        let height = page.height().value;
        let image_count = page
            .objects()
            .iter()
            .filter(|object| object.object_type() == PdfPageObjectType::Image)
            .count();
        let text = page
            .text()
            .map_err(|e| DocumentError::Unreadable(e.to_string()))?;
        let words = collect_words(&text);
        Ok(PageSnapshot::from_words(page_index, width, height, image_count, words))
    }

    fn render_png(&self, page_index: usize, zoom: f32) -> Result<Vec<u8>, DocumentError> {
        if page_index >= self.pages {
            return Err(DocumentError::PageOutOfRange { index: page_index, pages: self.pages });
        }
        if zoom <= 0.0 {
            return Err(DocumentError::RenderFailure(format!("invalid zoom {zoom}")));
        }
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&self.bytes, None)
            .map_err(map_load_error)?;
        let page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| DocumentError::Unreadable(e.to_string()))?;

        let (width_px, height_px) =
            render_dimensions(page.width().value, page.height().value, zoom);
        let config = PdfRenderConfig::new()
            .set_target_width(width_px)
            .set_maximum_height(height_px);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| DocumentError::RenderFailure(e.to_string()))?;
        let image = bitmap.as_image();

        let mut png_bytes: Vec<u8> = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png_bytes), ImageOutputFormat::Png)
            .map_err(|e| DocumentError::RenderFailure(e.to_string()))?;
        debug!(page = page_index + 1, width_px, height_px, "page rasterized");
        Ok(png_bytes)
    }
}

/// Binds the PDFium dynamic library: `PDFIUM_DYNAMIC_LIB_PATH` first, then
/// the executable's directory, then the system library path.
fn load_pdfium() -> Result<Pdfium, DocumentError> {
    if let Ok(dir) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        if let Ok(bindings) =
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        {
            return Ok(Pdfium::new(bindings));
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let dir = dir.to_string_lossy().into_owned();
            if let Ok(bindings) =
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
            {
                return Ok(Pdfium::new(bindings));
            }
        }
    }
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| DocumentError::Unreadable(format!("PDFium library not available: {e}")))
}

/// PDFium's load errors do not distinguish encryption cleanly; the message
/// does.
fn map_load_error(err: PdfiumError) -> DocumentError {
    let msg = err.to_string();
    if is_encryption_message(&msg) {
        DocumentError::Encrypted
    } else {
        DocumentError::Unreadable(msg)
    }
}

fn is_encryption_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("password") || lower.contains("encrypt")
}

/// Pixel dimensions for a zoomed page, clamped to the render cap.
fn render_dimensions(width_pts: f32, height_pts: f32, zoom: f32) -> (i32, i32) {
    let width = (width_pts * zoom).round() as i32;
    let height = (height_pts * zoom).round() as i32;
    (
        width.clamp(1, MAX_RENDER_DIMENSION_PX),
        height.clamp(1, MAX_RENDER_DIMENSION_PX),
    )
}

/// Builds word boxes from the page's character stream. Whitespace ends a
/// word; carriage returns and line feeds end the line. Pages whose stream
/// carries no line markers get their lines split by box geometry instead.
fn collect_words(text: &PdfPageText) -> Vec<WordBox> {
    let mut words: Vec<WordBox> = Vec::new();
    let mut current_text = String::new();
    let mut current_rect: Option<Rect> = None;
    let mut line = 0usize;
    let mut line_has_words = false;

    let flush =
        |text: &mut String, rect: &mut Option<Rect>, words: &mut Vec<WordBox>, line: usize| {
            if text.is_empty() {
                *rect = None;
                return false;
            }
            match rect.take() {
                Some(r) => {
                    words.push(WordBox { text: std::mem::take(text), rect: r, line });
                    true
                }
                None => {
                    // A glyph run with no usable boxes cannot be annotated.
                    text.clear();
                    false
                }
            }
        };

    for ch in text.chars().iter() {
        let Some(c) = ch.unicode_char() else {
            continue;
        };
        if c == '\r' || c == '\n' {
            if flush(&mut current_text, &mut current_rect, &mut words, line) {
                line_has_words = true;
            }
            if line_has_words {
                line += 1;
                line_has_words = false;
            }
            continue;
        }
        if c.is_whitespace() {
            if flush(&mut current_text, &mut current_rect, &mut words, line) {
                line_has_words = true;
            }
            continue;
        }
        current_text.push(c);
        if let Ok(bounds) = ch.loose_bounds() {
            let r = Rect::new(
                bounds.left().value,
                bounds.bottom().value,
                bounds.right().value,
                bounds.top().value,
            );
            current_rect = Some(match current_rect {
                Some(existing) => existing.union(&r),
                None => r,
            });
        }
    }
    flush(&mut current_text, &mut current_rect, &mut words, line);

    split_lines_by_geometry(&mut words);
    words
}

/// Bumps line indices where consecutive words on one declared line have no
/// vertical overlap.
fn split_lines_by_geometry(words: &mut [WordBox]) {
    let mut adjusted = 0usize;
    let mut prev_raw_line: Option<usize> = None;
    let mut prev_rect: Option<Rect> = None;
    for word in words.iter_mut() {
        if let (Some(prev_line), Some(prev)) = (prev_raw_line, prev_rect) {
            if word.line == prev_line {
                let overlap = prev.y1.min(word.rect.y1) - prev.y0.max(word.rect.y0);
                if overlap <= 0.0 {
                    adjusted += 1;
                }
            }
        }
        prev_raw_line = Some(word.line);
        prev_rect = Some(word.rect);
        word.line += adjusted;
    }
}
