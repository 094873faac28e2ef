//! Random-forest regressor.
//!
//! Bootstrap-aggregated CART trees with `mtry` features tried per split.
//! Trees are fitted in parallel; each tree's random stream is derived from the
//! forest seed and the tree index only, so results do not depend on
//! scheduling.
//!
//! Permutation importance (optional) is measured on each tree's out-of-bag
//! rows: the increase in OOB MSE after shuffling one feature. `raw` is the
//! mean increase over trees, `scaled` divides it by its standard error
//! (mean / (sd / √trees)).

pub mod tree;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::matrix::Matrix;
use crate::parallel::par_map_range;
use crate::stats::{mean, std_dev};
pub use tree::{RegressionTree, TreeParams};

/// Forest hyperparameters other than `mtry`, which is tuned per subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Nodes with at most this many rows are not split.
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
    /// Bootstrap size as a fraction of the training rows.
    pub sample_fraction: f64,
    /// Bootstrap with replacement.
    pub replace: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 500,
            min_node_size: 5,
            max_depth: None,
            sample_fraction: 1.0,
            replace: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Importance {
    pub raw: Vec<f64>,
    pub scaled: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    mtry: usize,
    importance: Option<Importance>,
}

fn tree_seed(seed: u64, tree: usize) -> u64 {
    seed ^ (tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl RandomForest {
    /// Fit on all rows of `x`.
    pub fn fit(
        x: &Matrix,
        y: &[f64],
        mtry: usize,
        params: &ForestParams,
        seed: u64,
        with_importance: bool,
    ) -> Result<Self> {
        let n = x.n_rows();
        if n == 0 {
            return Err(PipelineError::InsufficientSamples { context: "forest training", needed: 1, found: 0 });
        }
        if y.len() != n {
            return Err(PipelineError::IllPosed(format!(
                "forest training: {} responses for {} rows",
                y.len(),
                n
            )));
        }
        if x.n_cols() == 0 {
            return Err(PipelineError::InsufficientPredictors);
        }
        if params.n_trees == 0 {
            return Err(PipelineError::Config("forest needs at least one tree".into()));
        }

        let tree_params = TreeParams {
            mtry: mtry.clamp(1, x.n_cols()),
            min_node_size: params.min_node_size,
            max_depth: params.max_depth,
        };
        let n_boot = ((n as f64 * params.sample_fraction).round() as usize).clamp(1, n);

        let fitted: Vec<(RegressionTree, Option<Vec<f64>>)> = par_map_range(params.n_trees, |t| {
            let mut rng = StdRng::seed_from_u64(tree_seed(seed, t));
            let (rows, oob) = bootstrap(n, n_boot, params.replace, &mut rng);
            let tree = RegressionTree::fit(x, y, &rows, &tree_params, &mut rng);
            let imp = if with_importance { tree_importance(&tree, x, y, &oob, &mut rng) } else { None };
            (tree, imp)
        });

        let importance = with_importance.then(|| aggregate_importance(&fitted, x.n_cols()));
        let trees = fitted.into_iter().map(|(t, _)| t).collect();

        Ok(Self { trees, n_features: x.n_cols(), mtry: tree_params.mtry, importance })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict_matrix(&self, x: &Matrix) -> Vec<f64> {
        (0..x.n_rows()).map(|r| self.predict(x.row(r))).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn mtry(&self) -> usize {
        self.mtry
    }

    pub fn importance(&self) -> Option<&Importance> {
        self.importance.as_ref()
    }
}

/// Draw bootstrap rows and return them with the out-of-bag rows.
fn bootstrap<R: Rng>(n: usize, size: usize, replace: bool, rng: &mut R) -> (Vec<usize>, Vec<usize>) {
    let rows: Vec<usize> = if replace {
        (0..size).map(|_| rng.gen_range(0..n)).collect()
    } else {
        rand::seq::index::sample(rng, n, size).into_vec()
    };
    let mut in_bag = vec![false; n];
    for &r in &rows {
        in_bag[r] = true;
    }
    let oob = (0..n).filter(|&r| !in_bag[r]).collect();
    (rows, oob)
}

fn tree_importance<R: Rng>(tree: &RegressionTree, x: &Matrix, y: &[f64], oob: &[usize], rng: &mut R) -> Option<Vec<f64>> {
    if oob.is_empty() {
        return None;
    }
    let mse = |f: &dyn Fn(usize, &mut Vec<f64>)| -> f64 {
        let mut buf = Vec::with_capacity(x.n_cols());
        oob.iter()
            .enumerate()
            .map(|(k, &r)| {
                buf.clear();
                buf.extend_from_slice(x.row(r));
                f(k, &mut buf);
                (tree.predict(&buf) - y[r]).powi(2)
            })
            .sum::<f64>()
            / oob.len() as f64
    };
    let base = mse(&|_: usize, _: &mut Vec<f64>| {});
    let imp = (0..x.n_cols())
        .map(|feature| {
            let mut shuffled: Vec<f64> = oob.iter().map(|&r| x.get(r, feature)).collect();
            shuffled.shuffle(&mut *rng);
            mse(&|k: usize, row: &mut Vec<f64>| row[feature] = shuffled[k]) - base
        })
        .collect();
    Some(imp)
}

fn aggregate_importance(fitted: &[(RegressionTree, Option<Vec<f64>>)], n_features: usize) -> Importance {
    let mut raw = vec![0f64; n_features];
    let mut scaled = vec![0f64; n_features];
    for f in 0..n_features {
        let vals: Vec<f64> = fitted.iter().filter_map(|(_, imp)| imp.as_ref().map(|v| v[f])).collect();
        if vals.is_empty() {
            continue;
        }
        let m = mean(&vals);
        let sd = std_dev(&vals);
        raw[f] = m;
        scaled[f] = if sd.is_finite() && sd > 0.0 { m / (sd / (vals.len() as f64).sqrt()) } else { 0.0 };
    }
    Importance { raw, scaled }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    /// y depends on column 0 only; column 1 is noise.
    fn signal_and_noise(n: usize, seed: u64) -> (Matrix, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let a: f64 = rng.gen_range(0.0..10.0);
            let b: f64 = rng.gen_range(0.0..10.0);
            rows.push(vec![a, b]);
            y.push(3.0 * a + rng.gen_range(-0.5..0.5));
        }
        (Matrix::from_rows(&rows), y)
    }

    fn small_params() -> ForestParams {
        ForestParams { n_trees: 60, min_node_size: 3, ..Default::default() }
    }

    #[test]
    fn forest_fits_linear_signal() {
        let (x, y) = signal_and_noise(200, 1);
        let rf = RandomForest::fit(&x, &y, 2, &small_params(), 42, false).unwrap();
        let pred = rf.predict(&[5.0, 1.0]);
        assert!((pred - 15.0).abs() < 2.0, "prediction {pred} should be near 15");
        assert_eq!(rf.n_trees(), 60);
        assert!(rf.importance().is_none());
    }

    #[test]
    fn importance_ranks_signal_above_noise() {
        let (x, y) = signal_and_noise(200, 2);
        let rf = RandomForest::fit(&x, &y, 1, &small_params(), 7, true).unwrap();
        let imp = rf.importance().unwrap();
        assert!(imp.raw[0] > imp.raw[1] * 5.0, "raw importance {:?}", imp.raw);
        assert!(imp.scaled[0] > imp.scaled[1]);
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = signal_and_noise(80, 3);
        let a = RandomForest::fit(&x, &y, 1, &small_params(), 9, false).unwrap();
        let b = RandomForest::fit(&x, &y, 1, &small_params(), 9, false).unwrap();
        let queries = [[1.0, 2.0], [7.5, 0.3], [4.4, 9.9]];
        for p in &queries {
            assert_eq!(a.predict(p), b.predict(p));
        }
    }

    #[test]
    fn rejects_empty_training_set() {
        let x = Matrix::zeros(0, 2);
        assert!(RandomForest::fit(&x, &[], 1, &small_params(), 0, false).is_err());
    }

    #[test]
    fn bootstrap_partitions_rows() {
        let mut rng = StdRng::seed_from_u64(5);
        let (rows, oob) = bootstrap(50, 50, true, &mut rng);
        assert_eq!(rows.len(), 50);
        assert!(oob.iter().all(|r| !rows.contains(r)));
        let (rows, oob) = bootstrap(50, 30, false, &mut rng);
        assert_eq!(rows.len() + oob.len(), 50);
    }
}
