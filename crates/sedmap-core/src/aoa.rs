//! Area of applicability.
//!
//! Predictors are standardized with the training mean and sd and weighted by
//! the final model's permutation importance. The dissimilarity index (DI) of a
//! location is its distance to the nearest training row divided by the mean
//! pairwise training distance. The threshold is Q3 + 1.5·IQR of the training
//! DI, each training row measured against the other rows (or against rows of
//! the other CV folds). Locations with DI above the threshold, or with a
//! missing predictor, are outside.
use serde::Serialize;
use tracing::info;

use crate::config::AoaConfig;
use crate::error::{PipelineError, Result};
use crate::grid::Grid;
use crate::matrix::Matrix;
use crate::parallel::par_map_range;
use crate::regression::RegressionMatrix;
use crate::select::CandidateModel;
use crate::spatial::SpatialFolds;
use crate::stack::PredictorStack;
use crate::stats::{mean, quantile_sorted, std_dev};

#[derive(Debug, Clone, Serialize)]
pub struct AoaModel {
    pub predictors: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
    pub weights: Vec<f64>,
    /// Weighted standardized training rows.
    training: Vec<Vec<f64>>,
    pub mean_distance: f64,
    pub training_di: Vec<f64>,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct AoaMask {
    /// DI per cell; NaN where undefined.
    pub di: Grid,
    pub inside: Vec<bool>,
    pub threshold: f64,
    /// Share of mapped cells (in the AOI, no missing predictor) inside the
    /// AOA, in percent.
    pub percent_inside: f64,
}

impl AoaMask {
    /// 1 inside, 0 outside, NaN where the DI is undefined.
    pub fn inside_grid(&self) -> Grid {
        let data = self
            .di
            .data
            .iter()
            .zip(&self.inside)
            .map(|(d, &inside)| if !d.is_finite() { f32::NAN } else if inside { 1.0 } else { 0.0 })
            .collect();
        Grid::from_values(&self.di.geometry(), data)
    }
}

/// Importance → weights: negatives clipped to 0, scaled to a maximum of 1;
/// equal weights when nothing is positive.
pub fn importance_weights(importance: Option<&[f64]>, p: usize) -> Vec<f64> {
    let Some(imp) = importance else {
        return vec![1.0; p];
    };
    let clipped: Vec<f64> = imp.iter().map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 }).collect();
    let max = clipped.iter().copied().fold(0f64, f64::max);
    if max <= 0.0 {
        return vec![1.0; p];
    }
    clipped.iter().map(|v| v / max).collect()
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

impl AoaModel {
    /// Fit on the winning model's predictors and training rows.
    pub fn fit(
        m: &RegressionMatrix,
        model: &CandidateModel,
        folds: Option<&SpatialFolds>,
        cfg: &AoaConfig,
    ) -> Result<Self> {
        let x = m.subset(&model.predictors)?;
        let imp = model.forest.importance().map(|i| i.raw.as_slice());
        let weights = importance_weights(imp, model.predictors.len());
        let fold_of: Option<Vec<usize>> =
            folds.filter(|_| cfg.use_cv_folds).map(|f| (0..f.n_rows()).map(|r| f.fold_of(r)).collect());
        Self::fit_features(&model.predictors, &x, weights, fold_of.as_deref(), cfg.iqr_multiplier)
    }

    pub fn fit_features(
        predictors: &[String],
        x: &Matrix,
        weights: Vec<f64>,
        fold_of: Option<&[usize]>,
        iqr_multiplier: f64,
    ) -> Result<Self> {
        let n = x.n_rows();
        let p = x.n_cols();
        if n < 2 {
            return Err(PipelineError::InsufficientSamples { context: "area of applicability", needed: 2, found: n });
        }
        if weights.len() != p || predictors.len() != p {
            return Err(PipelineError::IllPosed(format!("{p} predictors but {} weights", weights.len())));
        }

        let mut means = Vec::with_capacity(p);
        let mut scales = Vec::with_capacity(p);
        for j in 0..p {
            let col = x.column(j);
            let sd = std_dev(&col);
            means.push(mean(&col));
            scales.push(if sd.is_finite() && sd > 0.0 { sd } else { 1.0 });
        }
        let training: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..p).map(|j| (x.get(i, j) - means[j]) / scales[j] * weights[j]).collect())
            .collect();

        let mut sum = 0f64;
        let mut pairs = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                sum += distance(&training[i], &training[j]);
                pairs += 1;
            }
        }
        let mean_distance = sum / pairs as f64;
        if !(mean_distance > 0.0) {
            return Err(PipelineError::IllPosed("mean training distance is zero; AOA undefined".into()));
        }

        let training_di: Vec<f64> = (0..n)
            .map(|i| {
                let nearest = (0..n)
                    .filter(|&j| j != i && fold_of.map_or(true, |f| f[j] != f[i]))
                    .map(|j| distance(&training[i], &training[j]))
                    .fold(f64::INFINITY, f64::min);
                if nearest.is_finite() { nearest / mean_distance } else { f64::NAN }
            })
            .collect();

        let mut sorted: Vec<f64> = training_di.iter().copied().filter(|d| d.is_finite()).collect();
        if sorted.is_empty() {
            return Err(PipelineError::IllPosed("no finite training DI".into()));
        }
        sorted.sort_by(f64::total_cmp);
        let q1 = quantile_sorted(&sorted, 0.25);
        let q3 = quantile_sorted(&sorted, 0.75);
        let threshold = q3 + iqr_multiplier * (q3 - q1);

        Ok(Self {
            predictors: predictors.to_vec(),
            means,
            scales,
            weights,
            training,
            mean_distance,
            training_di,
            threshold,
        })
    }

    /// DI of one location from raw predictor values; NaN if any is missing.
    pub fn di(&self, raw: &[f64]) -> f64 {
        if raw.len() != self.means.len() || raw.iter().any(|v| !v.is_finite()) {
            return f64::NAN;
        }
        let z: Vec<f64> = raw
            .iter()
            .enumerate()
            .map(|(j, v)| (v - self.means[j]) / self.scales[j] * self.weights[j])
            .collect();
        let nearest = self.training.iter().map(|t| distance(&z, t)).fold(f64::INFINITY, f64::min);
        nearest / self.mean_distance
    }

    pub fn is_inside(&self, di: f64) -> bool {
        di.is_finite() && di <= self.threshold
    }

    /// DI and inside flag for every cell of `stack`. Cells outside `aoi`
    /// are undefined.
    pub fn apply(&self, stack: &PredictorStack, aoi: Option<&Grid>) -> Result<AoaMask> {
        let Some(geom) = stack.geometry() else {
            return Err(PipelineError::MissingPredictor(self.predictors.first().cloned().unwrap_or_default()));
        };
        if let Some(mask) = aoi {
            stack.ensure_aligned("aoi", mask)?;
        }
        let layers = stack.layers_for(&self.predictors)?;

        let rows: Vec<Vec<f32>> = par_map_range(geom.height, |r| {
            let mut buf = Vec::with_capacity(layers.len());
            (0..geom.width)
                .map(|c| {
                    let cell = r * geom.width + c;
                    if aoi.is_some_and(|m| !m.is_set(cell)) || !PredictorStack::cell_features(&layers, cell, &mut buf) {
                        return f32::NAN;
                    }
                    self.di(&buf) as f32
                })
                .collect()
        });
        let data: Vec<f32> = rows.into_iter().flatten().collect();

        let inside: Vec<bool> = data.iter().map(|&d| self.is_inside(d as f64)).collect();
        // share of mapped cells: inside the AOI with every predictor defined
        let mapped = data.iter().filter(|d| d.is_finite()).count();
        let inside_cells = inside.iter().filter(|&&b| b).count();
        let percent_inside = if mapped == 0 { 0.0 } else { 100.0 * inside_cells as f64 / mapped as f64 };
        info!(threshold = self.threshold, percent_inside, "area of applicability computed");

        Ok(AoaMask { di: Grid::from_values(&geom, data), inside, threshold: self.threshold, percent_inside })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Crs;
    use approx::assert_abs_diff_eq;

    fn names() -> Vec<String> {
        vec!["depth".to_string(), "slope".to_string()]
    }

    fn training() -> Matrix {
        Matrix::from_rows(&[
            vec![10.0, 1.0],
            vec![12.0, 1.5],
            vec![14.0, 1.2],
            vec![11.0, 2.0],
            vec![13.0, 0.8],
        ])
    }

    #[test]
    fn training_location_has_zero_di() {
        let aoa = AoaModel::fit_features(&names(), &training(), vec![1.0, 1.0], None, 1.5).unwrap();
        let di = aoa.di(&[12.0, 1.5]);
        assert_abs_diff_eq!(di, 0.0, epsilon = 1e-12);
        assert!(aoa.is_inside(di));
        assert!(!aoa.is_inside(aoa.di(&[500.0, 40.0])));
        assert!(aoa.di(&[f64::NAN, 1.0]).is_nan());
        assert!(!aoa.is_inside(f64::NAN));
    }

    #[test]
    fn threshold_is_q3_plus_iqr() {
        let aoa = AoaModel::fit_features(&names(), &training(), vec![1.0, 1.0], None, 1.5).unwrap();
        let mut d = aoa.training_di.clone();
        d.sort_by(f64::total_cmp);
        let q1 = quantile_sorted(&d, 0.25);
        let q3 = quantile_sorted(&d, 0.75);
        assert_abs_diff_eq!(aoa.threshold, q3 + 1.5 * (q3 - q1), epsilon = 1e-12);
    }

    #[test]
    fn weights_from_importance() {
        assert_eq!(importance_weights(Some(&[2.0, -1.0, 4.0][..]), 3), vec![0.5, 0.0, 1.0]);
        assert_eq!(importance_weights(Some(&[-2.0, 0.0][..]), 2), vec![1.0, 1.0]);
        assert_eq!(importance_weights(None, 2), vec![1.0, 1.0]);
    }

    #[test]
    fn degenerate_training_sets() {
        let one = Matrix::from_rows(&[vec![1.0, 2.0]]);
        assert!(matches!(
            AoaModel::fit_features(&names(), &one, vec![1.0, 1.0], None, 1.5),
            Err(PipelineError::InsufficientSamples { .. })
        ));
        let same = Matrix::from_rows(&[vec![1.0, 2.0], vec![1.0, 2.0]]);
        assert!(matches!(
            AoaModel::fit_features(&names(), &same, vec![1.0, 1.0], None, 1.5),
            Err(PipelineError::IllPosed(_))
        ));
    }

    #[test]
    fn cv_folds_exclude_same_fold_neighbours() {
        let x = Matrix::from_rows(&[vec![0.0, 0.0], vec![0.1, 0.0], vec![5.0, 5.0], vec![5.1, 5.0]]);
        let loo = AoaModel::fit_features(&names(), &x, vec![1.0, 1.0], None, 1.5).unwrap();
        let cv = AoaModel::fit_features(&names(), &x, vec![1.0, 1.0], Some(&[0, 0, 1, 1]), 1.5).unwrap();
        assert!(cv.training_di[0] > loo.training_di[0] * 10.0);
    }

    #[test]
    fn apply_masks_aoi_and_missing_cells() {
        let mut stack = PredictorStack::new(Crs::new("EPSG:3035"));
        let mut depth = Grid::new(3, 1, 0.0, 30.0, 0.0, 10.0, 12.0);
        depth.set(0, 2, f32::NAN);
        stack.insert("depth", depth).unwrap();
        stack.insert("slope", Grid::new(3, 1, 0.0, 30.0, 0.0, 10.0, 1.5)).unwrap();
        let aoa = AoaModel::fit_features(&names(), &training(), vec![1.0, 1.0], None, 1.5).unwrap();

        let mask = aoa.apply(&stack, None).unwrap();
        assert_eq!(mask.inside, vec![true, true, false]);
        assert!(mask.di.get(0, 2).is_nan());
        // the no-data cell is not part of the mapped area
        assert_abs_diff_eq!(mask.percent_inside, 100.0, epsilon = 1e-9);
        let g = mask.inside_grid();
        assert_eq!(g.get(0, 0), 1.0);
        assert!(g.get(0, 2).is_nan());

        let mut aoi = Grid::new(3, 1, 0.0, 30.0, 0.0, 10.0, 1.0);
        aoi.set(0, 0, 0.0);
        let mask = aoa.apply(&stack, Some(&aoi)).unwrap();
        assert_eq!(mask.inside, vec![false, true, false]);
        assert_abs_diff_eq!(mask.percent_inside, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn percent_inside_ignores_nodata_padding() {
        let mut stack = PredictorStack::new(Crs::new("EPSG:3035"));
        let mut depth = Grid::new(4, 1, 0.0, 40.0, 0.0, 10.0, 12.0);
        depth.set(0, 2, f32::NAN);
        depth.set(0, 3, f32::NAN);
        depth.set(0, 1, 500.0);
        stack.insert("depth", depth).unwrap();
        stack.insert("slope", Grid::new(4, 1, 0.0, 40.0, 0.0, 10.0, 1.5)).unwrap();
        let aoa = AoaModel::fit_features(&names(), &training(), vec![1.0, 1.0], None, 1.5).unwrap();

        let mask = aoa.apply(&stack, None).unwrap();
        assert_eq!(mask.inside, vec![true, false, false, false]);
        assert_abs_diff_eq!(mask.percent_inside, 50.0, epsilon = 1e-9);
    }
}
