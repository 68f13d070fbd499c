//! Page-space geometry shared by every stage.
//!
//! All coordinates are PDF user-space points with the origin at the
//! bottom-left corner of the page: `y0` is the bottom edge of a rectangle,
//! `y1` the top. OCR pixel boxes are flipped into this space at the document
//! boundary so the rest of the engine never sees y-down data.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in page points, normalized so `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Top edge. Larger values are higher on the page.
    pub fn top(&self) -> f32 {
        self.y1
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let w = self.x1.min(other.x1) - self.x0.max(other.x0);
        let h = self.y1.min(other.y1) - self.y0.max(other.y0);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Overlap area divided by the smaller rectangle's area.
    ///
    /// Returns 0.0 when the rectangles are disjoint or either is degenerate.
    pub fn overlap_ratio(&self, other: &Rect) -> f32 {
        let smaller = self.area().min(other.area());
        if smaller <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / smaller
    }

    /// Union of a non-empty sequence; `None` for an empty one.
    pub fn union_all<I>(rects: I) -> Option<Rect>
    where
        I: IntoIterator<Item = Rect>,
    {
        rects.into_iter().reduce(|a, b| a.union(&b))
    }
}

/// Four-corner quadrilateral for native highlight annotations.
///
/// Corner order matches what annotation viewers expect for QuadPoints:
/// top-left, top-right, bottom-left, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub tl: (f32, f32),
    pub tr: (f32, f32),
    pub bl: (f32, f32),
    pub br: (f32, f32),
}

impl Quad {
    pub fn from_rect(r: &Rect) -> Self {
        Self {
            tl: (r.x0, r.y1),
            tr: (r.x1, r.y1),
            bl: (r.x0, r.y0),
            br: (r.x1, r.y0),
        }
    }
}

/// RGB color with components in 0.0–1.0.
///
/// Deserializes from a plain triple; 0–255 triples are scaled down
/// automatically when any component exceeds 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    /// Builds a color, rescaling 0–255 inputs into 0–1.
    pub fn normalized(r: f32, g: f32, b: f32) -> Self {
        let (r, g, b) = if r > 1.0 || g > 1.0 || b > 1.0 {
            (r / 255.0, g / 255.0, b / 255.0)
        } else {
            (r, g, b)
        };
        Self {
            r: r.clamp(0.0, 1.0),
            g: g.clamp(0.0, 1.0),
            b: b.clamp(0.0, 1.0),
        }
    }

    /// Parses `#RRGGBB` (leading `#` optional). Returns `None` on malformed input.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self {
            r: f32::from(r) / 255.0,
            g: f32::from(g) / 255.0,
            b: f32::from(b) / 255.0,
        })
    }
}

impl From<[f32; 3]> for Rgb {
    fn from(v: [f32; 3]) -> Self {
        Rgb::normalized(v[0], v[1], v[2])
    }
}

impl From<Rgb> for [f32; 3] {
    fn from(c: Rgb) -> Self {
        [c.r, c.g, c.b]
    }
}
