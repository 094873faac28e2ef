//! Named, co-registered predictor layers.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coords::{Crs, Position};
use crate::error::{PipelineError, Result};
use crate::grid::{Grid, GridGeometry};

/// On-disk form of a stack: CRS tag plus named layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFile {
    pub crs: Crs,
    pub layers: BTreeMap<String, Grid>,
}

/// Predictor raster stack. Every layer shares one geometry; insertion of a
/// misaligned layer fails.
#[derive(Debug, Clone)]
pub struct PredictorStack {
    crs: Crs,
    geometry: Option<GridGeometry>,
    layers: BTreeMap<String, Grid>,
}

impl PredictorStack {
    pub fn new(crs: Crs) -> Self {
        Self { crs, geometry: None, layers: BTreeMap::new() }
    }

    pub fn from_file(file: StackFile) -> Result<Self> {
        let mut stack = Self::new(file.crs);
        for (name, grid) in file.layers {
            stack.insert(name, grid)?;
        }
        Ok(stack)
    }

    pub fn insert(&mut self, name: impl Into<String>, grid: Grid) -> Result<()> {
        let name = name.into();
        if grid.data.len() != grid.width * grid.height || grid.width == 0 || grid.height == 0 {
            return Err(PipelineError::NotCoRegistered { layer: name });
        }
        let geom = grid.geometry();
        match self.geometry {
            Some(g) if !g.matches(&geom) => return Err(PipelineError::NotCoRegistered { layer: name }),
            Some(_) => {}
            None => self.geometry = Some(geom),
        }
        self.layers.insert(name, grid);
        Ok(())
    }

    /// Check that `grid` (e.g. an AOI mask) lies on the stack geometry.
    pub fn ensure_aligned(&self, layer: &str, grid: &Grid) -> Result<()> {
        match self.geometry {
            Some(g) if g.matches(&grid.geometry()) && grid.data.len() == g.n_cells() => Ok(()),
            _ => Err(PipelineError::NotCoRegistered { layer: layer.to_string() }),
        }
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Shared geometry, None for an empty stack.
    pub fn geometry(&self) -> Option<GridGeometry> {
        self.geometry
    }

    /// Layer names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    pub fn layer(&self, name: &str) -> Result<&Grid> {
        self.layers.get(name).ok_or_else(|| PipelineError::MissingPredictor(name.to_string()))
    }

    /// Resolve layer references for `names`, in order.
    pub fn layers_for(&self, names: &[String]) -> Result<Vec<&Grid>> {
        names.iter().map(|n| self.layer(n)).collect()
    }

    /// Values of `names` at `p`; NaN where missing or outside.
    pub fn values_at(&self, p: &Position, names: &[String]) -> Result<Vec<f64>> {
        let layers = self.layers_for(names)?;
        Ok(layers
            .iter()
            .map(|g| g.value_at(p).map_or(f64::NAN, f64::from))
            .collect())
    }

    /// Fill `out` with the values of `layers` at cell index `cell`.
    /// Returns false as soon as one layer has no data there.
    pub fn cell_features(layers: &[&Grid], cell: usize, out: &mut Vec<f64>) -> bool {
        out.clear();
        for g in layers {
            let v = g.data[cell];
            if !v.is_finite() {
                return false;
            }
            out.push(v as f64);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(fill: f32) -> Grid {
        Grid::new(3, 3, 0.0, 30.0, 0.0, 30.0, fill)
    }

    #[test]
    fn misaligned_layer_is_rejected() {
        let mut s = PredictorStack::new(Crs::new("EPSG:3035"));
        s.insert("depth", layer(1.0)).unwrap();
        let shifted = Grid::new(3, 3, 1.0, 31.0, 0.0, 30.0, 0.0);
        assert!(matches!(s.insert("slope", shifted), Err(PipelineError::NotCoRegistered { .. })));
        let coarser = Grid::new(2, 2, 0.0, 30.0, 0.0, 30.0, 0.0);
        assert!(s.insert("bpi", coarser).is_err());
        assert_eq!(s.names(), vec!["depth".to_string()]);
    }

    #[test]
    fn values_at_reports_missing_as_nan() {
        let mut s = PredictorStack::new(Crs::new("EPSG:3035"));
        let mut a = layer(2.0);
        a.set(1, 1, f32::NAN);
        s.insert("a", a).unwrap();
        s.insert("b", layer(5.0)).unwrap();
        let names = vec!["b".to_string(), "a".to_string()];
        let v = s.values_at(&Position::new(5.0, 5.0), &names).unwrap();
        assert_eq!(v, vec![5.0, 2.0]);
        let v = s.values_at(&Position::new(15.0, 15.0), &names).unwrap();
        assert!(v[1].is_nan());
        assert!(s.values_at(&Position::new(5.0, 5.0), &["zzz".to_string()]).is_err());
    }

    #[test]
    fn aoi_alignment() {
        let mut s = PredictorStack::new(Crs::new("EPSG:3035"));
        assert!(s.ensure_aligned("aoi", &layer(1.0)).is_err());
        s.insert("a", layer(0.0)).unwrap();
        assert!(s.ensure_aligned("aoi", &layer(1.0)).is_ok());
        assert!(s.ensure_aligned("aoi", &Grid::new(3, 3, 0.0, 60.0, 0.0, 30.0, 1.0)).is_err());
    }
}
