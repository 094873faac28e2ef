//! Planar coordinate types for the working (projected) CRS.
//! All coordinate math uses f64 for precision; distances are Euclidean in
//! CRS units, so samples must be in a projected CRS before use.
use serde::{Deserialize, Serialize};

/// Coordinate reference system tag, e.g. `"EPSG:3035"`.
/// Reprojection is the caller's job; the pipeline only compares tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(pub String);

impl Crs {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point in the working CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    /// Smallest extent containing all positions, or None when empty.
    pub fn enclosing(positions: &[Position]) -> Option<Self> {
        let first = positions.first()?;
        let mut e = Self { min_x: first.x, max_x: first.x, min_y: first.y, max_y: first.y };
        for p in &positions[1..] {
            e.min_x = e.min_x.min(p.x);
            e.max_x = e.max_x.max(p.x);
            e.min_y = e.min_y.min(p.y);
            e.max_y = e.max_y.max(p.y);
        }
        Some(e)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, p: &Position) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}
