//! OCR capability behind a trait, so image-based pages work when a Tesseract
//! build is available and every test runs without one.
//!
//! The bundled implementation feeds PNG bytes to Tesseract and reads word
//! geometry back out of its TSV output (level-5 rows are words).

use thiserror::Error;

#[cfg(feature = "ocr")]
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR initialization failed: {0}")]
    Init(String),
    #[error("OCR processing failed: {0}")]
    Processing(String),
}

/// Pixel-space box with the origin at the top-left of the bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One word recognized on a rasterized page.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    /// 0.0–1.0; Tesseract's −1 "no estimate" rows clamp to 0.0.
    pub confidence: f32,
    pub bounding_box: PixelBox,
}

/// Recognition over PNG bytes. Implementations must be cheap to construct;
/// the engine may be invoked once per image-based page.
pub trait OcrEngine {
    fn recognize(&self, png: &[u8], language: &str) -> Result<Vec<OcrWord>, OcrError>;
}

/// Parses Tesseract TSV output into words.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Words are level 5.
pub fn parse_tsv_words(tsv: &str) -> Vec<OcrWord> {
    let mut words = Vec::new();
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }
        let geom: Option<[u32; 4]> = (|| {
            Some([
                fields[6].parse().ok()?,
                fields[7].parse().ok()?,
                fields[8].parse().ok()?,
                fields[9].parse().ok()?,
            ])
        })();
        let Some([x, y, width, height]) = geom else {
            continue;
        };
        let conf: f32 = fields[10].parse().unwrap_or(0.0);
        words.push(OcrWord {
            text: text.to_string(),
            confidence: (conf / 100.0).clamp(0.0, 1.0),
            bounding_box: PixelBox { x, y, width, height },
        });
    }
    words
}

/// Tesseract-backed engine. Requires the `ocr` feature and a language pack
/// reachable through the default tessdata path or the one given here.
#[cfg(feature = "ocr")]
pub struct TesseractOcr {
    datapath: Option<PathBuf>,
}

#[cfg(feature = "ocr")]
impl TesseractOcr {
    pub fn new() -> Self {
        Self { datapath: None }
    }

    pub fn with_datapath(datapath: PathBuf) -> Self {
        Self { datapath: Some(datapath) }
    }
}

#[cfg(feature = "ocr")]
impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for TesseractOcr {
    fn recognize(&self, png: &[u8], language: &str) -> Result<Vec<OcrWord>, OcrError> {
        let datapath = self.datapath.as_ref().and_then(|p| p.to_str());
        let tess = tesseract::Tesseract::new(datapath, Some(language))
            .map_err(|e| OcrError::Init(e.to_string()))?;
        let mut tess = tess
            .set_image_from_mem(png)
            .map_err(|e| OcrError::Processing(e.to_string()))?;
        let tsv = tess
            .get_tsv_text(0)
            .map_err(|e| OcrError::Processing(e.to_string()))?;
        Ok(parse_tsv_words(&tsv))
    }
}

/// Deterministic engine for tests: returns configured words, or lays the
/// words of a text out left to right on one baseline.
#[derive(Debug, Clone, Default)]
pub struct MockOcrEngine {
    words: Vec<OcrWord>,
    fail: bool,
}

impl MockOcrEngine {
    pub fn with_words(words: Vec<OcrWord>) -> Self {
        Self { words, fail: false }
    }

    /// 60 px per word slot on a single row, 30 px tall, confidence 0.9.
    pub fn from_text(text: &str) -> Self {
        let words = text
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| OcrWord {
                text: w.to_string(),
                confidence: 0.9,
                bounding_box: PixelBox {
                    x: 100 + i as u32 * 60,
                    y: 100,
                    width: 50,
                    height: 30,
                },
            })
            .collect();
        Self { words, fail: false }
    }

    pub fn failing() -> Self {
        Self { words: Vec::new(), fail: true }
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _png: &[u8], _language: &str) -> Result<Vec<OcrWord>, OcrError> {
        if self.fail {
            return Err(OcrError::Processing("mock OCR failure".into()));
        }
        Ok(self.words.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t2000\t3000\t-1\t\n\
4\t1\t1\t1\t1\t0\t100\t200\t800\t40\t-1\t\n\
5\t1\t1\t1\t1\t1\t100\t200\t120\t40\t96.5\tInformed\n\
5\t1\t1\t1\t1\t2\t230\t200\t110\t40\t91.0\tconsent\n\
5\t1\t1\t1\t1\t3\t350\t200\t90\t40\t-1\tform\n\
5\t1\t1\t1\t1\t4\t450\t200\t90\t40\t88.0\t \n\
bad row without enough fields\n";

    #[test]
    fn tsv_keeps_level_five_words_with_geometry() {
        let words = parse_tsv_words(TSV);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "Informed");
        assert_eq!(
            words[0].bounding_box,
            PixelBox { x: 100, y: 200, width: 120, height: 40 }
        );
        assert!((words[0].confidence - 0.965).abs() < 1e-3);
        assert_eq!(words[1].text, "consent");
    }

    #[test]
    fn tsv_clamps_missing_confidence_to_zero() {
        let words = parse_tsv_words(TSV);
        assert_eq!(words[2].text, "form");
        assert_eq!(words[2].confidence, 0.0);
    }

    #[test]
    fn mock_from_text_lays_words_left_to_right() {
        let engine = MockOcrEngine::from_text("alpha beta gamma");
        let words = engine.recognize(&[], "eng").unwrap();
        assert_eq!(words.len(), 3);
        assert!(words[0].bounding_box.x < words[1].bounding_box.x);
        assert!(words[1].bounding_box.x < words[2].bounding_box.x);
    }

    #[test]
    fn failing_mock_reports_processing_error() {
        let engine = MockOcrEngine::failing();
        assert!(matches!(
            engine.recognize(&[], "eng"),
            Err(OcrError::Processing(_))
        ));
    }
}
