//! lopdf-backed annotation writing: highlights, overlays, notes, outline
//! bookmarks, and document metadata, saved as a new file.
//!
//! Annotations are stored as indirect objects referenced from each page's
//! `Annots` array. Removal filters that array by subtype, so only the
//! subtypes this writer emits (`Highlight`, `Square`, `Text`) are touched
//! and links or form fields survive.

use std::collections::BTreeMap;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use tracing::debug;

use crate::geometry::{Quad, Rect, Rgb};

use super::{AnnotationSink, BookmarkNode, DocumentError, DocumentMetadata, DocumentWriter};

/// Annotation flag bit 3: print the annotation with the page.
const PRINT_FLAG: i64 = 4;

const REMOVABLE_SUBTYPES: [&[u8]; 3] = [b"Highlight", b"Square", b"Text"];

pub struct LopdfWriter {
    doc: Document,
    pages: BTreeMap<u32, ObjectId>,
}

enum AnnotsSlot {
    Direct,
    Indirect(ObjectId),
}

impl LopdfWriter {
    pub fn open(path: &Path) -> Result<Self, DocumentError> {
        let doc =
            Document::load(path).map_err(|e| DocumentError::Unreadable(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let doc =
            Document::load_mem(bytes).map_err(|e| DocumentError::Unreadable(e.to_string()))?;
        Self::from_document(doc)
    }

    fn from_document(doc: Document) -> Result<Self, DocumentError> {
        if doc.is_encrypted() {
            return Err(DocumentError::Encrypted);
        }
        let pages = doc.get_pages();
        Ok(Self { doc, pages })
    }

    /// Serialized document, mostly for tests.
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, DocumentError> {
        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| DocumentError::SaveFailure(e.to_string()))?;
        Ok(out)
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId, DocumentError> {
        self.pages
            .get(&page_number)
            .copied()
            .ok_or(DocumentError::PageOutOfRange {
                index: page_number.saturating_sub(1) as usize,
                pages: self.pages.len(),
            })
    }

    /// The page's annotation array, with an indirect `Annots` resolved.
    fn annots_array(&self, page_id: ObjectId) -> Result<Vec<Object>, DocumentError> {
        let page = self
            .doc
            .get_dictionary(page_id)
            .map_err(|e| DocumentError::WriteFailure(e.to_string()))?;
        match page.get(b"Annots") {
            Ok(Object::Array(array)) => Ok(array.clone()),
            Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                Ok(Object::Array(array)) => Ok(array.clone()),
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }

    /// Writes the array back where it came from: in place for an indirect
    /// `Annots`, into the page dictionary otherwise.
    fn set_annots_array(
        &mut self,
        page_id: ObjectId,
        annots: Vec<Object>,
    ) -> Result<(), DocumentError> {
        let slot = {
            let page = self
                .doc
                .get_dictionary(page_id)
                .map_err(|e| DocumentError::WriteFailure(e.to_string()))?;
            match page.get(b"Annots") {
                Ok(Object::Reference(id)) => AnnotsSlot::Indirect(*id),
                _ => AnnotsSlot::Direct,
            }
        };
        match slot {
            AnnotsSlot::Indirect(id) => {
                let object = self
                    .doc
                    .get_object_mut(id)
                    .map_err(|e| DocumentError::WriteFailure(e.to_string()))?;
                *object = Object::Array(annots);
            }
            AnnotsSlot::Direct => {
                let page = self
                    .doc
                    .get_object_mut(page_id)
                    .and_then(Object::as_dict_mut)
                    .map_err(|e| DocumentError::WriteFailure(e.to_string()))?;
                page.set("Annots", Object::Array(annots));
            }
        }
        Ok(())
    }

    fn push_annotation(
        &mut self,
        page_number: u32,
        annotation: Dictionary,
    ) -> Result<(), DocumentError> {
        let page_id = self.page_id(page_number)?;
        let annot_id = self.doc.add_object(Object::Dictionary(annotation));
        let mut annots = self.annots_array(page_id)?;
        annots.push(Object::Reference(annot_id));
        self.set_annots_array(page_id, annots)
    }

    fn entry_subtype(&self, entry: &Object) -> Option<Vec<u8>> {
        let dict = match entry {
            Object::Reference(id) => self.doc.get_dictionary(*id).ok()?,
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        dict.get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(<[u8]>::to_vec)
    }

    fn dest_array(&self, page_number: u32) -> Result<Object, DocumentError> {
        let page_id = self.page_id(page_number)?;
        Ok(Object::Array(vec![
            Object::Reference(page_id),
            Object::Name(b"Fit".to_vec()),
        ]))
    }

    fn catalog_id(&self) -> Result<ObjectId, DocumentError> {
        match self.doc.trailer.get(b"Root") {
            Ok(Object::Reference(id)) => Ok(*id),
            _ => Err(DocumentError::WriteFailure("document has no catalog".into())),
        }
    }

    fn existing_info(&self) -> Option<Dictionary> {
        match self.doc.trailer.get(b"Info").ok()? {
            Object::Reference(id) => self.doc.get_dictionary(*id).ok().cloned(),
            Object::Dictionary(dict) => Some(dict.clone()),
            _ => None,
        }
    }
}

impl AnnotationSink for LopdfWriter {
    fn add_highlight(
        &mut self,
        page_number: u32,
        rect: Rect,
        quads: &[Quad],
        color: Rgb,
        opacity: f32,
        contents: &str,
    ) -> Result<(), DocumentError> {
        self.push_annotation(page_number, highlight_dictionary(rect, quads, color, opacity, contents))
    }

    fn add_overlay(
        &mut self,
        page_number: u32,
        rect: Rect,
        fill: Rgb,
        stroke: Rgb,
        stroke_width: f32,
        opacity: f32,
        contents: &str,
    ) -> Result<(), DocumentError> {
        self.push_annotation(
            page_number,
            square_dictionary(rect, fill, stroke, stroke_width, opacity, contents),
        )
    }

    fn add_note(
        &mut self,
        page_number: u32,
        rect: Rect,
        color: Rgb,
        contents: &str,
    ) -> Result<(), DocumentError> {
        self.push_annotation(page_number, note_dictionary(rect, color, contents))
    }

    fn remove_annotations(&mut self, page_number: u32) -> Result<usize, DocumentError> {
        let page_id = self.page_id(page_number)?;
        let annots = self.annots_array(page_id)?;
        if annots.is_empty() {
            return Ok(0);
        }
        let mut kept = Vec::with_capacity(annots.len());
        let mut removed = 0usize;
        for entry in annots {
            let ours = self
                .entry_subtype(&entry)
                .map_or(false, |subtype| REMOVABLE_SUBTYPES.contains(&subtype.as_slice()));
            if ours {
                removed += 1;
            } else {
                kept.push(entry);
            }
        }
        if removed > 0 {
            self.set_annots_array(page_id, kept)?;
        }
        Ok(removed)
    }
}

impl DocumentWriter for LopdfWriter {
    fn set_metadata(&mut self, metadata: &DocumentMetadata) -> Result<(), DocumentError> {
        let mut info = self.existing_info().unwrap_or_default();
        if let Some(title) = &metadata.title {
            info.set("Title", text_string(title));
        }
        if let Some(subject) = &metadata.subject {
            info.set("Subject", text_string(subject));
        }
        if let Some(keywords) = &metadata.keywords {
            info.set("Keywords", text_string(keywords));
        }
        if let Some(producer) = &metadata.producer {
            info.set("Producer", text_string(producer));
        }
        if let Some(modified) = &metadata.modified {
            info.set("ModDate", text_string(modified));
        }
        let info_id = self.doc.add_object(Object::Dictionary(info));
        self.doc.trailer.set("Info", Object::Reference(info_id));
        Ok(())
    }

    /// Replaces the outline with a two-level tree. Module nodes carry their
    /// page entries; every node with a page number gets a `/Fit` destination.
    fn add_bookmarks(&mut self, bookmarks: &[BookmarkNode]) -> Result<usize, DocumentError> {
        if bookmarks.is_empty() {
            return Ok(0);
        }
        let root_id = self.doc.new_object_id();
        let module_ids: Vec<ObjectId> =
            bookmarks.iter().map(|_| self.doc.new_object_id()).collect();
        let child_ids: Vec<Vec<ObjectId>> = bookmarks
            .iter()
            .map(|node| node.children.iter().map(|_| self.doc.new_object_id()).collect())
            .collect();

        for (i, node) in bookmarks.iter().enumerate() {
            let mut dict = Dictionary::new();
            dict.set("Title", text_string(&node.title));
            dict.set("Parent", Object::Reference(root_id));
            if i > 0 {
                dict.set("Prev", Object::Reference(module_ids[i - 1]));
            }
            if i + 1 < module_ids.len() {
                dict.set("Next", Object::Reference(module_ids[i + 1]));
            }
            if let (Some(first), Some(last)) = (child_ids[i].first(), child_ids[i].last()) {
                dict.set("First", Object::Reference(*first));
                dict.set("Last", Object::Reference(*last));
                dict.set("Count", Object::Integer(child_ids[i].len() as i64));
            }
            if let Some(page) = node.page_number {
                dict.set("Dest", self.dest_array(page)?);
            }
            self.doc.objects.insert(module_ids[i], Object::Dictionary(dict));

            for (j, child) in node.children.iter().enumerate() {
                let mut dict = Dictionary::new();
                dict.set("Title", text_string(&child.title));
                dict.set("Parent", Object::Reference(module_ids[i]));
                if j > 0 {
                    dict.set("Prev", Object::Reference(child_ids[i][j - 1]));
                }
                if j + 1 < child_ids[i].len() {
                    dict.set("Next", Object::Reference(child_ids[i][j + 1]));
                }
                if let Some(page) = child.page_number {
                    dict.set("Dest", self.dest_array(page)?);
                }
                self.doc.objects.insert(child_ids[i][j], Object::Dictionary(dict));
            }
        }

        let total_entries: usize =
            bookmarks.len() + child_ids.iter().map(Vec::len).sum::<usize>();
        let mut root = Dictionary::new();
        root.set("Type", Object::Name(b"Outlines".to_vec()));
        if let (Some(first), Some(last)) = (module_ids.first(), module_ids.last()) {
            root.set("First", Object::Reference(*first));
            root.set("Last", Object::Reference(*last));
            root.set("Count", Object::Integer(total_entries as i64));
        }
        self.doc.objects.insert(root_id, Object::Dictionary(root));

        let catalog_id = self.catalog_id()?;
        let catalog = self
            .doc
            .get_object_mut(catalog_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| DocumentError::WriteFailure(e.to_string()))?;
        catalog.set("Outlines", Object::Reference(root_id));
        catalog.set("PageMode", Object::Name(b"UseOutlines".to_vec()));

        let leafs = bookmarks.iter().map(BookmarkNode::leaf_count).sum();
        debug!(entries = total_entries, leafs, "outline written");
        Ok(leafs)
    }

    fn save_to_file(&mut self, path: &Path) -> Result<(), DocumentError> {
        self.doc
            .save(path)
            .map(|_| ())
            .map_err(|e| DocumentError::SaveFailure(e.to_string()))?;
        debug!(path = %path.display(), "annotated document saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Annotation dictionary builders
// ---------------------------------------------------------------------------

fn highlight_dictionary(
    rect: Rect,
    quads: &[Quad],
    color: Rgb,
    opacity: f32,
    contents: &str,
) -> Dictionary {
    let mut quad_points = Vec::with_capacity(quads.len() * 8);
    for quad in quads {
        // Viewer order: top-left, top-right, bottom-left, bottom-right.
        for (x, y) in [quad.tl, quad.tr, quad.bl, quad.br] {
            quad_points.push(Object::Real(x));
            quad_points.push(Object::Real(y));
        }
    }
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"Annot".to_vec()));
    dict.set("Subtype", Object::Name(b"Highlight".to_vec()));
    dict.set("Rect", rect_array(rect));
    dict.set("QuadPoints", Object::Array(quad_points));
    dict.set("C", color_array(color));
    dict.set("CA", Object::Real(opacity));
    dict.set("F", Object::Integer(PRINT_FLAG));
    dict.set("Contents", text_string(contents));
    dict
}

fn square_dictionary(
    rect: Rect,
    fill: Rgb,
    stroke: Rgb,
    stroke_width: f32,
    opacity: f32,
    contents: &str,
) -> Dictionary {
    let mut border_style = Dictionary::new();
    border_style.set("W", Object::Real(stroke_width));
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"Annot".to_vec()));
    dict.set("Subtype", Object::Name(b"Square".to_vec()));
    dict.set("Rect", rect_array(rect));
    dict.set("C", color_array(stroke));
    dict.set("IC", color_array(fill));
    dict.set("CA", Object::Real(opacity));
    dict.set("BS", Object::Dictionary(border_style));
    dict.set("F", Object::Integer(PRINT_FLAG));
    dict.set("Contents", text_string(contents));
    dict
}

fn note_dictionary(rect: Rect, color: Rgb, contents: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"Annot".to_vec()));
    dict.set("Subtype", Object::Name(b"Text".to_vec()));
    dict.set("Name", Object::Name(b"Comment".to_vec()));
    dict.set("Rect", rect_array(rect));
    dict.set("C", color_array(color));
    dict.set("F", Object::Integer(PRINT_FLAG));
    dict.set("Contents", text_string(contents));
    dict
}

fn rect_array(rect: Rect) -> Object {
    Object::Array(vec![
        Object::Real(rect.x0),
        Object::Real(rect.y0),
        Object::Real(rect.x1),
        Object::Real(rect.y1),
    ])
}

fn color_array(color: Rgb) -> Object {
    Object::Array(vec![
        Object::Real(color.r),
        Object::Real(color.g),
        Object::Real(color.b),
    ])
}

fn text_string(text: &str) -> Object {
    Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
}
