//! Provenance annotation engine: finds the text snippets behind
//! machine-extracted facts inside the source PDF and marks them up with
//! native annotations, navigation bookmarks, and a quality report.

pub mod classify;
pub mod config;
pub mod document;
pub mod geometry;
pub mod locate;
pub mod orchestrate;
pub mod page;
pub mod provenance;
pub mod render;
pub mod report;

pub use classify::{classify_counts, PageClassification, PageClassifier, PageType};
pub use config::{AnnotatorConfig, ConfigError, APP_NAME, APP_VERSION};
pub use document::{
    AnnotationSink, BookmarkNode, DocumentError, DocumentMetadata, DocumentReader,
    DocumentWriter, LopdfWriter, PdfiumReader,
};
pub use geometry::{Quad, Rect, Rgb};
pub use locate::{LocateStrategy, MatchMethod, OcrEngine, TextLocator, TextMatch};
pub use orchestrate::{AnnotationEngine, EngineError, Phase};
pub use page::PageSnapshot;
pub use provenance::{CollectionStats, ProvenanceCollector, ProvenanceItem};
pub use render::{AnnotationRenderer, AnnotationResult};
pub use report::{AnnotationReport, AnnotationStatistics};
