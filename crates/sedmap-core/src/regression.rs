//! Regression matrix: one row per usable sample, predictors sampled at the
//! cell under the sample.
use serde::Serialize;
use tracing::{debug, warn};

use crate::coords::Position;
use crate::error::{PipelineError, Result};
use crate::matrix::Matrix;
use crate::samples::Sample;
use crate::stack::PredictorStack;

/// A sample left out of the regression matrix.
#[derive(Debug, Clone, Serialize)]
pub struct ExcludedRow {
    pub station: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RegressionMatrix {
    pub predictors: Vec<String>,
    pub features: Matrix,
    pub response: Vec<f64>,
    pub positions: Vec<Position>,
    pub stations: Vec<String>,
    pub excluded: Vec<ExcludedRow>,
}

impl RegressionMatrix {
    /// Sample every stack layer at each sample position. `response[i]` belongs
    /// to `samples[i]`. Rows with a missing predictor, a position outside the
    /// raster or a non-finite response are excluded and reported.
    pub fn build(samples: &[Sample], response: &[f64], stack: &PredictorStack) -> Result<Self> {
        if samples.len() != response.len() {
            return Err(PipelineError::IllPosed(format!(
                "{} responses for {} samples",
                response.len(),
                samples.len()
            )));
        }
        let predictors = stack.names();
        if predictors.is_empty() {
            return Err(PipelineError::InsufficientPredictors);
        }

        let mut data = Vec::with_capacity(samples.len() * predictors.len());
        let mut kept_response = Vec::new();
        let mut positions = Vec::new();
        let mut stations = Vec::new();
        let mut excluded = Vec::new();

        for (s, &y) in samples.iter().zip(response) {
            let row = stack.values_at(&s.position, &predictors)?;
            let missing: Vec<&str> = predictors
                .iter()
                .zip(&row)
                .filter(|(_, v)| !v.is_finite())
                .map(|(n, _)| n.as_str())
                .collect();
            let reason = if !y.is_finite() {
                Some("non-finite response".to_string())
            } else if !missing.is_empty() {
                Some(format!("missing predictors: {}", missing.join(", ")))
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    debug!(station = %s.station, %reason, "sample excluded");
                    excluded.push(ExcludedRow { station: s.station.clone(), reason });
                }
                None => {
                    data.extend_from_slice(&row);
                    kept_response.push(y);
                    positions.push(s.position);
                    stations.push(s.station.clone());
                }
            }
        }

        if kept_response.is_empty() {
            return Err(PipelineError::EmptyRegressionMatrix { excluded: excluded.len() });
        }
        if !excluded.is_empty() {
            warn!(excluded = excluded.len(), kept = kept_response.len(), "samples excluded from regression matrix");
        }

        let features = Matrix::from_row_major(kept_response.len(), predictors.len(), data);
        Ok(Self { predictors, features, response: kept_response, positions, stations, excluded })
    }

    pub fn n_rows(&self) -> usize {
        self.response.len()
    }

    /// Column indices of `names`, in order.
    pub fn column_indices(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.predictors
                    .iter()
                    .position(|p| p == n)
                    .ok_or_else(|| PipelineError::MissingPredictor(n.clone()))
            })
            .collect()
    }

    /// Feature columns restricted to `names`.
    pub fn subset(&self, names: &[String]) -> Result<Matrix> {
        let cols = self.column_indices(names)?;
        Ok(self.features.select_columns(&cols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositional::Fractions;
    use crate::coords::Crs;
    use crate::grid::Grid;
    use crate::samples::Provenance;

    fn sample(station: &str, x: f64, y: f64) -> Sample {
        Sample {
            station: station.into(),
            source: "survey".into(),
            provenance: Provenance::Measured,
            crs: Crs::new("EPSG:3035"),
            position: Position::new(x, y),
            fractions: Fractions::new(20.0, 70.0, 10.0),
        }
    }

    fn stack() -> PredictorStack {
        let mut depth = Grid::new(2, 2, 0.0, 20.0, 0.0, 20.0, 0.0);
        depth.set(0, 0, 10.0);
        depth.set(0, 1, 20.0);
        depth.set(1, 0, 30.0);
        depth.set(1, 1, f32::NAN);
        let slope = Grid::new(2, 2, 0.0, 20.0, 0.0, 20.0, 1.5);
        let mut s = PredictorStack::new(Crs::new("EPSG:3035"));
        s.insert("depth", depth).unwrap();
        s.insert("slope", slope).unwrap();
        s
    }

    #[test]
    fn excludes_missing_and_outside_rows() {
        let samples = [
            sample("a", 5.0, 5.0),
            sample("b", 15.0, 5.0),
            sample("c", 15.0, 15.0), // NaN depth
            sample("d", 50.0, 5.0),  // outside
        ];
        let m = RegressionMatrix::build(&samples, &[1.0, 2.0, 3.0, 4.0], &stack()).unwrap();
        assert_eq!(m.predictors, vec!["depth".to_string(), "slope".to_string()]);
        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.features.row(1), &[20.0, 1.5]);
        assert_eq!(m.response, vec![1.0, 2.0]);
        assert_eq!(m.excluded.len(), 2);
        assert_eq!(m.excluded[0].station, "c");
        assert!(m.excluded[0].reason.contains("depth"));
    }

    #[test]
    fn all_excluded_is_an_error() {
        let samples = [sample("x", 99.0, 99.0)];
        let err = RegressionMatrix::build(&samples, &[0.0], &stack()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyRegressionMatrix { excluded: 1 }));
    }

    #[test]
    fn subset_selects_named_columns() {
        let samples = [sample("a", 5.0, 5.0)];
        let m = RegressionMatrix::build(&samples, &[0.0], &stack()).unwrap();
        let s = m.subset(&["slope".to_string()]).unwrap();
        assert_eq!(s.row(0), &[1.5]);
        assert!(m.subset(&["rugosity".to_string()]).is_err());
    }
}
