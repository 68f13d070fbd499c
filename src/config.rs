//! Engine configuration: rendering colors, matching thresholds, OCR settings.
//!
//! Loaded from an optional JSON file and overridden by CLI flags. Unknown
//! keys are ignored; a field holding a value of the wrong shape falls back
//! to its default with a warning instead of failing the run.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::geometry::Rgb;

pub const APP_NAME: &str = "provmark";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid JSON: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    /// Fill color for native text highlights. Accepts 0–1 or 0–255 triples.
    pub highlight_color: Rgb,
    /// Highlight and overlay opacity, 0.0–1.0.
    pub highlight_opacity: f32,
    /// Border color for rectangle overlays on image-based pages.
    pub stroke_color: Rgb,
    /// Border width in points for rectangle overlays.
    pub stroke_width: f32,
    /// Acceptance cutoff for fuzzy matching, 0.0–1.0.
    pub fuzzy_threshold: f32,
    /// Tesseract language code for OCR fallback.
    pub ocr_language: String,
    /// Rasterization density for OCR, dots per inch.
    pub ocr_dpi: u32,
    /// Success-rate floor below which the report carries a warning.
    /// Never fails the run.
    pub min_success_rate: f32,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            highlight_color: Rgb::normalized(1.0, 0.8, 0.0),
            highlight_opacity: 0.4,
            stroke_color: Rgb::normalized(0.85, 0.1, 0.1),
            stroke_width: 1.5,
            fuzzy_threshold: 0.85,
            ocr_language: "eng".to_string(),
            ocr_dpi: 300,
            min_success_rate: 0.80,
        }
    }
}

impl AnnotatorConfig {
    /// Loads a config file, tolerating per-field shape mismatches.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self::from_value(&value))
    }

    /// Builds a config from a parsed JSON object, field by field.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let defaults = Self::default();
        let Some(map) = value.as_object() else {
            warn!("config root is not a JSON object, using defaults");
            return defaults;
        };
        let mut cfg = Self {
            highlight_color: field(map, "highlight_color", defaults.highlight_color),
            highlight_opacity: field(map, "highlight_opacity", defaults.highlight_opacity),
            stroke_color: field(map, "stroke_color", defaults.stroke_color),
            stroke_width: field(map, "stroke_width", defaults.stroke_width),
            fuzzy_threshold: field(map, "fuzzy_threshold", defaults.fuzzy_threshold),
            ocr_language: field(map, "ocr_language", defaults.ocr_language),
            ocr_dpi: field(map, "ocr_dpi", defaults.ocr_dpi),
            min_success_rate: field(map, "min_success_rate", defaults.min_success_rate),
        };
        cfg.clamp();
        cfg
    }

    /// Pulls every ratio-valued field back into its legal range.
    pub fn clamp(&mut self) {
        self.highlight_opacity = self.highlight_opacity.clamp(0.0, 1.0);
        self.fuzzy_threshold = self.fuzzy_threshold.clamp(0.0, 1.0);
        self.min_success_rate = self.min_success_rate.clamp(0.0, 1.0);
        self.stroke_width = self.stroke_width.max(0.0);
        if self.ocr_dpi == 0 {
            warn!("ocr_dpi of 0 is invalid, using default 300");
            self.ocr_dpi = 300;
        }
    }
}

/// One field of the config object; wrong-shaped values fall back with a warning.
fn field<T: for<'de> Deserialize<'de>>(
    map: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    default: T,
) -> T {
    match map.get(key) {
        None => default,
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(key, error = %e, "config value has wrong shape, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AnnotatorConfig::default();
        assert!((cfg.fuzzy_threshold - 0.85).abs() < 1e-6);
        assert_eq!(cfg.ocr_dpi, 300);
        assert_eq!(cfg.ocr_language, "eng");
        assert!((cfg.min_success_rate - 0.80).abs() < 1e-6);
    }

    #[test]
    fn version_constant_is_wired() {
        assert_eq!(APP_VERSION, "0.3.0");
        assert_eq!(APP_NAME, "provmark");
    }

    #[test]
    fn byte_scale_color_is_normalized_on_load() {
        let cfg = AnnotatorConfig::from_value(&json!({
            "highlight_color": [255, 204, 0]
        }));
        assert!((cfg.highlight_color.r - 1.0).abs() < 1e-6);
        assert!((cfg.highlight_color.g - 0.8).abs() < 1e-2);
        assert_eq!(cfg.highlight_color.b, 0.0);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = AnnotatorConfig::from_value(&json!({
            "fuzzy_threshold": 0.9,
            "some_future_option": true
        }));
        assert!((cfg.fuzzy_threshold - 0.9).abs() < 1e-6);
    }

    #[test]
    fn wrong_shape_falls_back_to_default() {
        let cfg = AnnotatorConfig::from_value(&json!({
            "ocr_dpi": "three hundred",
            "fuzzy_threshold": 0.9
        }));
        assert_eq!(cfg.ocr_dpi, 300);
        assert!((cfg.fuzzy_threshold - 0.9).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_ratios_are_clamped() {
        let cfg = AnnotatorConfig::from_value(&json!({
            "highlight_opacity": 1.8,
            "fuzzy_threshold": -0.2,
            "ocr_dpi": 0
        }));
        assert_eq!(cfg.highlight_opacity, 1.0);
        assert_eq!(cfg.fuzzy_threshold, 0.0);
        assert_eq!(cfg.ocr_dpi, 300);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "highlight_opacity": 0.25 }"#).unwrap();
        let cfg = AnnotatorConfig::from_json_file(&path).unwrap();
        assert!((cfg.highlight_opacity - 0.25).abs() < 1e-6);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            AnnotatorConfig::from_json_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
