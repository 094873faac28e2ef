use serde::{Deserialize, Serialize};

use crate::coords::Position;

/// Tolerance for comparing grid bounds, relative to the cell size.
const ALIGN_EPS: f64 = 1e-6;

/// A 2D raster layer storing f32 values, row-major.
/// Bounds are cell edges; row 0 is the row at `min_y`.
/// `NaN` marks no-data. Coordinate math uses f64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    /// Row-major cell values; NaN = no-data (`null` in JSON).
    #[serde(with = "nodata")]
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// JSON has no NaN: no-data cells travel as `null`.
mod nodata {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[f32], s: S) -> Result<S::Ok, S::Error> {
        let cells: Vec<Option<f32>> = data.iter().map(|v| v.is_finite().then_some(*v)).collect();
        cells.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f32>, D::Error> {
        let cells: Vec<Option<f32>> = Vec::deserialize(d)?;
        Ok(cells.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    }
}

/// Raster geometry without values, used for co-registration checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub width: usize,
    pub height: usize,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl GridGeometry {
    pub fn cell_width(&self) -> f64 {
        (self.max_x - self.min_x) / self.width as f64
    }

    pub fn cell_height(&self) -> f64 {
        (self.max_y - self.min_y) / self.height as f64
    }

    pub fn n_cells(&self) -> usize {
        self.width * self.height
    }

    /// Same shape, extent and pixel alignment.
    pub fn matches(&self, other: &GridGeometry) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        let tol_x = self.cell_width().abs() * ALIGN_EPS;
        let tol_y = self.cell_height().abs() * ALIGN_EPS;
        (self.min_x - other.min_x).abs() <= tol_x
            && (self.max_x - other.max_x).abs() <= tol_x
            && (self.min_y - other.min_y).abs() <= tol_y
            && (self.max_y - other.max_y).abs() <= tol_y
    }

    /// (row, col) of the cell containing `p`, or None outside the extent.
    /// Points on the max edge belong to the last cell.
    pub fn cell_of(&self, p: &Position) -> Option<(usize, usize)> {
        if !(p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y) {
            return None;
        }
        let col = ((p.x - self.min_x) / self.cell_width()).floor() as usize;
        let row = ((p.y - self.min_y) / self.cell_height()).floor() as usize;
        Some((row.min(self.height - 1), col.min(self.width - 1)))
    }

    pub fn cell_center(&self, row: usize, col: usize) -> Position {
        Position::new(
            self.min_x + (col as f64 + 0.5) * self.cell_width(),
            self.min_y + (row as f64 + 0.5) * self.cell_height(),
        )
    }
}

impl Grid {
    /// Create a new Grid filled with the given value.
    pub fn new(width: usize, height: usize, min_x: f64, max_x: f64, min_y: f64, max_y: f64, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Build a grid from row-major values on the given geometry.
    pub fn from_values(geom: &GridGeometry, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), geom.n_cells());
        Self {
            data,
            width: geom.width,
            height: geom.height,
            min_x: geom.min_x,
            max_x: geom.max_x,
            min_y: geom.min_y,
            max_y: geom.max_y,
        }
    }

    pub fn geometry(&self) -> GridGeometry {
        GridGeometry {
            width: self.width,
            height: self.height,
            min_x: self.min_x,
            max_x: self.max_x,
            min_y: self.min_y,
            max_y: self.max_y,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    /// Value of the cell containing (x, y).
    /// Returns None outside the grid or on a no-data cell.
    pub fn value_at(&self, p: &Position) -> Option<f32> {
        let (row, col) = self.geometry().cell_of(p)?;
        let v = self.get(row, col);
        v.is_finite().then_some(v)
    }

    /// Number of cells holding data.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    /// Mask semantics: a cell is set when it holds a non-zero value.
    #[inline]
    pub fn is_set(&self, cell: usize) -> bool {
        let v = self.data[cell];
        v.is_finite() && v != 0.0
    }
}
