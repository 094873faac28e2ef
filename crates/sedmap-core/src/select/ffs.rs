//! Forward feature selection scored by spatially blocked cross-validation.
//!
//! Every pair of candidates is scored first; the best pair is then extended
//! one predictor at a time for as long as the score strictly improves. A
//! subset's score is the best, over the mtry grid, of the fold-averaged
//! metric. All (subset, mtry, fold) fits of one round run as a single
//! parallel map and are regrouped by job index.
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, SelectionMetric};
use crate::error::{PipelineError, Result};
use crate::forest::RandomForest;
use crate::parallel::par_map;
use crate::regression::RegressionMatrix;
use crate::spatial::SpatialFolds;
use crate::stats::{mean, pearson_r, ValidationStats};

/// Winning model of a selection run.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateModel {
    pub predictors: Vec<String>,
    pub mtry: usize,
    pub metric: SelectionMetric,
    /// Fold-averaged CV score.
    pub score: f64,
    /// Fitted on all rows, with permutation importance.
    pub forest: RandomForest,
    /// Out-of-fold prediction for every row of the regression matrix.
    pub oof_predictions: Vec<f64>,
    pub stats: ValidationStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct FfsStep {
    pub predictors: Vec<String>,
    pub mtry: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FfsReport {
    pub model: CandidateModel,
    /// Accepted steps; scores improve monotonically.
    pub history: Vec<FfsStep>,
    /// Subsets actually scored.
    pub evaluations: usize,
}

/// mtry values tried for `p` predictors: `tune_length` values spread from 2
/// to p, floored and deduplicated (log-spaced from p = 500).
pub fn mtry_grid(p: usize, tune_length: usize) -> Vec<usize> {
    if p <= 1 {
        return vec![1];
    }
    if tune_length <= 1 {
        return vec![(p / 3).max(1)];
    }
    let len = p.min(tune_length);
    let mut grid: Vec<usize> = if p < 500 {
        (0..len)
            .map(|i| {
                let t = if len == 1 { 0.0 } else { i as f64 / (len - 1) as f64 };
                (2.0 + t * (p as f64 - 2.0)).floor() as usize
            })
            .collect()
    } else {
        let top = (p as f64).log2();
        (0..len)
            .map(|i| {
                let t = i as f64 / (len - 1) as f64;
                2f64.powf(1.0 + t * (top - 1.0)).floor() as usize
            })
            .collect()
    };
    grid.dedup();
    grid
}

/// Subset evaluations of a full run over `n` candidates (pairs plus every
/// extension round).
pub fn evaluation_budget(n: usize) -> usize {
    if n < 2 {
        return n;
    }
    n * (n - 1) / 2 + (n - 2) * (n - 1) / 2
}

/// Scores of one subset.
struct SubsetScore {
    mtry: usize,
    score: f64,
    /// Out-of-fold predictions at the winning mtry.
    oof: Vec<f64>,
}

struct Evaluator<'a> {
    m: &'a RegressionMatrix,
    folds: &'a SpatialFolds,
    cfg: &'a PipelineConfig,
    fold_rows: Vec<(Vec<usize>, Vec<usize>)>,
}

impl<'a> Evaluator<'a> {
    fn new(m: &'a RegressionMatrix, folds: &'a SpatialFolds, cfg: &'a PipelineConfig) -> Self {
        let fold_rows = (0..folds.k()).map(|f| (folds.train_indices(f), folds.validation_indices(f))).collect();
        Self { m, folds, cfg, fold_rows }
    }

    fn names(&self, subset: &[usize]) -> String {
        subset.iter().map(|&c| self.m.predictors[c].as_str()).collect::<Vec<_>>().join(", ")
    }

    fn fold_metric(&self, observed: &[f64], predicted: &[f64]) -> f64 {
        match self.cfg.ffs.metric {
            SelectionMetric::Rmse => ValidationStats::from_predictions(observed, predicted).rmse,
            SelectionMetric::RSquared => pearson_r(observed, predicted).powi(2),
        }
    }

    /// Train on a fold's training rows and predict its validation rows.
    fn run_job(&self, subset: &[usize], mtry: usize, fold: usize) -> Result<Vec<f64>> {
        let (train, val) = &self.fold_rows[fold];
        let x_train = self.m.features.select(train, subset);
        let y_train: Vec<f64> = train.iter().map(|&r| self.m.response[r]).collect();
        let rf = RandomForest::fit(&x_train, &y_train, mtry, &self.cfg.forest, self.cfg.seed, false)?;
        let x_val = self.m.features.select(val, subset);
        Ok(rf.predict_matrix(&x_val))
    }

    /// Score every subset over the mtry grid and all folds in one parallel map.
    fn score(&self, subsets: &[Vec<usize>]) -> Result<Vec<SubsetScore>> {
        let k = self.folds.k();
        let grids: Vec<Vec<usize>> = subsets.iter().map(|s| mtry_grid(s.len(), self.cfg.ffs.tune_length)).collect();
        let jobs: Vec<(usize, usize, usize)> = grids
            .iter()
            .enumerate()
            .flat_map(|(s, grid)| grid.iter().flat_map(move |&mtry| (0..k).map(move |f| (s, mtry, f))))
            .collect();

        let results = par_map(&jobs, |&(s, mtry, f)| {
            self.run_job(&subsets[s], mtry, f).map_err(|e| PipelineError::Evaluation {
                subset: self.names(&subsets[s]),
                source: Box::new(e),
            })
        });
        let results: Vec<Vec<f64>> = results.into_iter().collect::<Result<_>>()?;

        let metric = self.cfg.ffs.metric;
        let mut out = Vec::with_capacity(subsets.len());
        let mut job = 0;
        for grid in &grids {
            let mut best: Option<SubsetScore> = None;
            for &mtry in grid {
                let mut oof = vec![f64::NAN; self.m.n_rows()];
                let mut per_fold = Vec::with_capacity(k);
                for f in 0..k {
                    let pred = &results[job];
                    job += 1;
                    let val = &self.fold_rows[f].1;
                    let obs: Vec<f64> = val.iter().map(|&r| self.m.response[r]).collect();
                    for (&r, &p) in val.iter().zip(pred) {
                        oof[r] = p;
                    }
                    if !val.is_empty() {
                        per_fold.push(self.fold_metric(&obs, pred));
                    }
                }
                let score = mean(&per_fold);
                let score = if score.is_finite() { score } else { metric.worst() };
                if best.as_ref().map_or(true, |b| metric.better(score, b.score)) {
                    best = Some(SubsetScore { mtry, score, oof });
                }
            }
            match best {
                Some(b) => out.push(b),
                None => return Err(PipelineError::IllPosed("empty mtry grid".into())),
            }
        }
        Ok(out)
    }
}

/// Index of the best score; first wins on ties.
fn best_of(scores: &[SubsetScore], metric: SelectionMetric) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, s) in scores.iter().enumerate() {
        if best.map_or(true, |b| metric.better(s.score, scores[b].score)) {
            best = Some(i);
        }
    }
    best
}

/// Greedy forward selection over `candidates` with fixed `folds`.
pub fn forward_select(
    m: &RegressionMatrix,
    candidates: &[String],
    folds: &SpatialFolds,
    cfg: &PipelineConfig,
) -> Result<FfsReport> {
    let n = candidates.len();
    if n == 0 {
        return Err(PipelineError::InsufficientPredictors);
    }
    if folds.n_rows() != m.n_rows() {
        return Err(PipelineError::IllPosed(format!(
            "fold assignment covers {} rows, matrix has {}",
            folds.n_rows(),
            m.n_rows()
        )));
    }
    let cols = m.column_indices(candidates)?;
    let metric = cfg.ffs.metric;
    let eval = Evaluator::new(m, folds, cfg);

    let budget = evaluation_budget(n);
    info!(candidates = n, budget, metric = metric.name(), "forward feature selection started");
    if budget > cfg.ffs.warn_evaluations {
        warn!(budget, limit = cfg.ffs.warn_evaluations, "large number of subset evaluations");
    }

    let mut history = Vec::new();
    let mut evaluations = 0;
    let (mut current, mut current_score) = if n == 1 {
        warn!(predictor = %candidates[0], "single candidate predictor; evaluated alone");
        let subsets = vec![vec![cols[0]]];
        let scores = eval.score(&subsets)?;
        evaluations += 1;
        (subsets[0].clone(), scores.into_iter().next())
    } else {
        let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
        for a in 0..n {
            for b in (a + 1)..n {
                pairs.push(vec![cols[a], cols[b]]);
            }
        }
        let scores = eval.score(&pairs)?;
        evaluations += pairs.len();
        let Some(best) = best_of(&scores, metric) else {
            return Err(PipelineError::InsufficientPredictors);
        };
        (pairs[best].clone(), scores.into_iter().nth(best))
    };
    let Some(mut best_score) = current_score.take() else {
        return Err(PipelineError::IllPosed("no subset was scored".into()));
    };
    history.push(FfsStep { predictors: names_of(m, &current), mtry: best_score.mtry, score: best_score.score });
    debug!(subset = %eval.names(&current), score = best_score.score, "best starting subset");

    loop {
        let remaining: Vec<usize> = cols.iter().copied().filter(|c| !current.contains(c)).collect();
        if remaining.is_empty() {
            break;
        }
        let extensions: Vec<Vec<usize>> = remaining
            .iter()
            .map(|&c| {
                let mut s = current.clone();
                s.push(c);
                s
            })
            .collect();
        let scores = eval.score(&extensions)?;
        evaluations += extensions.len();
        let Some(i) = best_of(&scores, metric) else { break };
        if !metric.better(scores[i].score, best_score.score) {
            debug!(best_extension = scores[i].score, current = best_score.score, "no improvement; stopping");
            break;
        }
        current = extensions[i].clone();
        best_score = scores.into_iter().nth(i).ok_or_else(|| PipelineError::IllPosed("lost score".into()))?;
        history.push(FfsStep { predictors: names_of(m, &current), mtry: best_score.mtry, score: best_score.score });
        debug!(subset = %eval.names(&current), score = best_score.score, "subset extended");
    }

    let predictors = names_of(m, &current);
    let x = m.features.select_columns(&current);
    let forest = RandomForest::fit(&x, &m.response, best_score.mtry, &cfg.forest, cfg.seed, true)?;
    let stats = ValidationStats::from_predictions(&m.response, &best_score.oof);
    info!(
        predictors = ?predictors,
        mtry = best_score.mtry,
        score = best_score.score,
        rmse = stats.rmse,
        r_squared = stats.r_squared,
        evaluations,
        "forward feature selection finished"
    );

    Ok(FfsReport {
        model: CandidateModel {
            predictors,
            mtry: best_score.mtry,
            metric,
            score: best_score.score,
            forest,
            oof_predictions: best_score.oof,
            stats,
        },
        history,
        evaluations,
    })
}

fn names_of(m: &RegressionMatrix, cols: &[usize]) -> Vec<String> {
    cols.iter().map(|&c| m.predictors[c].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Position;
    use crate::error::ErrorKind;
    use crate::matrix::Matrix;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn mtry_grid_matches_var_seq() {
        assert_eq!(mtry_grid(1, 3), vec![1]);
        assert_eq!(mtry_grid(2, 3), vec![2]);
        assert_eq!(mtry_grid(3, 3), vec![2, 3]);
        assert_eq!(mtry_grid(10, 3), vec![2, 6, 10]);
        assert_eq!(mtry_grid(9, 1), vec![3]);
    }

    #[test]
    fn budget_counts_pairs_and_extensions() {
        assert_eq!(evaluation_budget(2), 1);
        assert_eq!(evaluation_budget(4), 6 + 3);
        assert_eq!(evaluation_budget(10), 45 + 36);
    }

    /// Gridded samples; response driven by "a" and "b", "c" and "d" are noise.
    fn setup(seed: u64) -> (RegressionMatrix, SpatialFolds, PipelineConfig) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut y = Vec::new();
        let mut pos = Vec::new();
        for i in 0..12 {
            for j in 0..12 {
                let r: Vec<f64> = (0..4).map(|_| rng.gen_range(0.0..1.0)).collect();
                y.push(5.0 * r[0] - 4.0 * r[1] + rng.gen_range(-0.05..0.05));
                rows.push(r);
                pos.push(Position::new(i as f64 * 10.0, j as f64 * 10.0));
            }
        }
        let n = y.len();
        let m = RegressionMatrix {
            predictors: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
            features: Matrix::from_rows(&rows),
            response: y,
            positions: pos.clone(),
            stations: (0..n).map(|i| i.to_string()).collect(),
            excluded: Vec::new(),
        };
        let folds = SpatialFolds::partition(&pos, 30.0, 4, 10, 1).unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.forest.n_trees = 40;
        cfg.forest.min_node_size = 3;
        cfg.ffs.tune_length = 2;
        (m, folds, cfg)
    }

    #[test]
    fn selects_informative_pair_with_monotone_history() {
        let (m, folds, cfg) = setup(3);
        let report = forward_select(&m, &m.predictors, &folds, &cfg).unwrap();
        let mut sel = report.model.predictors.clone();
        sel.sort();
        assert!(sel.starts_with(&["a".to_string(), "b".to_string()]), "selected {sel:?}");
        assert_eq!(report.history[0].predictors.len(), 2);
        for w in report.history.windows(2) {
            assert!(w[1].score < w[0].score);
        }
        assert_eq!(report.model.oof_predictions.len(), m.n_rows());
        assert!(report.model.oof_predictions.iter().all(|p| p.is_finite()));
        assert!(report.model.stats.rmse.is_finite());
        assert!(report.model.forest.importance().is_some());
        assert!(report.evaluations >= 6);
    }

    #[test]
    fn r_squared_metric_prefers_higher() {
        let (m, folds, mut cfg) = setup(5);
        cfg.ffs.metric = SelectionMetric::RSquared;
        let report = forward_select(&m, &m.predictors, &folds, &cfg).unwrap();
        for w in report.history.windows(2) {
            assert!(w[1].score > w[0].score);
        }
        assert!(report.model.score > 0.5);
    }

    #[test]
    fn single_and_empty_candidate_sets() {
        let (m, folds, cfg) = setup(7);
        let report = forward_select(&m, &["a".to_string()], &folds, &cfg).unwrap();
        assert_eq!(report.model.predictors, vec!["a".to_string()]);
        assert_eq!(report.model.mtry, 1);
        assert!(matches!(forward_select(&m, &[], &folds, &cfg), Err(PipelineError::InsufficientPredictors)));
    }

    #[test]
    fn failed_fit_aborts_the_whole_search() {
        let (m, folds, mut cfg) = setup(11);
        cfg.forest.n_trees = 0;
        let err = forward_select(&m, &m.predictors, &folds, &cfg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Worker);
        match err {
            PipelineError::Evaluation { subset, source } => {
                assert!(subset.contains(", "), "subset {subset}");
                assert!(matches!(*source, PipelineError::Config(_)));
            }
            other => panic!("expected Evaluation, got {other:?}"),
        }
    }

    #[test]
    fn same_seed_same_selection() {
        let (m, folds, cfg) = setup(9);
        let a = forward_select(&m, &m.predictors, &folds, &cfg).unwrap();
        let b = forward_select(&m, &m.predictors, &folds, &cfg).unwrap();
        assert_eq!(a.model.predictors, b.model.predictors);
        assert_eq!(a.model.score, b.model.score);
    }
}
