//! Boruta-style all-relevant pre-selection.
//!
//! Each run appends shadow columns (permuted copies of the live predictors,
//! at least five) and fits an importance forest. A predictor scores a hit when
//! its scaled importance beats the best shadow. After every run the undecided
//! predictors are tested against Binomial(runs, ½) with a Bonferroni-adjusted
//! level: significantly many hits confirm, significantly few reject. Rejected
//! predictors leave the model for all later runs.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use statrs::distribution::{Binomial, DiscreteCDF};
use tracing::{debug, info};

use crate::config::{PipelineConfig, TentativePolicy};
use crate::error::{PipelineError, Result};
use crate::forest::{ForestParams, RandomForest};
use crate::matrix::Matrix;
use crate::regression::RegressionMatrix;
use crate::stats::{mean, quantile_sorted};

const SHADOW_SALT: u64 = 0x5AAD_0B0E;
const MIN_SHADOWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Confirmed,
    Tentative,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictorVerdict {
    pub name: String,
    pub verdict: Verdict,
    pub hits: u64,
    /// Over the runs the predictor took part in; NaN when never fitted.
    pub median_importance: f64,
    pub mean_importance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerdictSet {
    pub runs: usize,
    pub entries: Vec<PredictorVerdict>,
}

impl VerdictSet {
    /// Mark every predictor Confirmed without fitting anything.
    pub fn all_confirmed(names: &[String]) -> Self {
        let entries = names
            .iter()
            .map(|n| PredictorVerdict {
                name: n.clone(),
                verdict: Verdict::Confirmed,
                hits: 0,
                median_importance: f64::NAN,
                mean_importance: f64::NAN,
            })
            .collect();
        Self { runs: 0, entries }
    }

    pub fn get(&self, name: &str) -> Option<&PredictorVerdict> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn with_verdict(&self, verdict: Verdict) -> Vec<String> {
        self.entries.iter().filter(|e| e.verdict == verdict).map(|e| e.name.clone()).collect()
    }

    /// Predictors handed on to decorrelation, in matrix order.
    pub fn passed(&self, policy: TentativePolicy) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| match e.verdict {
                Verdict::Confirmed => true,
                Verdict::Tentative => policy == TentativePolicy::Keep,
                Verdict::Rejected => false,
            })
            .map(|e| e.name.clone())
            .collect()
    }
}

/// Run the shadow-feature filter over every predictor of `m`.
pub fn preselect(m: &RegressionMatrix, cfg: &PipelineConfig) -> Result<VerdictSet> {
    let p_cfg = &cfg.preselection;
    if !p_cfg.enabled {
        info!(predictors = m.predictors.len(), "pre-selection disabled; all predictors confirmed");
        return Ok(VerdictSet::all_confirmed(&m.predictors));
    }
    let p = m.predictors.len();
    if p == 0 {
        return Err(PipelineError::InsufficientPredictors);
    }
    let n = m.n_rows();
    if n < 2 {
        return Err(PipelineError::InsufficientSamples { context: "pre-selection", needed: 2, found: n });
    }

    let forest = ForestParams { n_trees: p_cfg.n_trees, ..cfg.forest.clone() };
    let mut rng = StdRng::seed_from_u64(cfg.seed ^ SHADOW_SALT);
    let mut verdict: Vec<Option<Verdict>> = vec![None; p];
    let mut hits = vec![0u64; p];
    let mut history: Vec<Vec<f64>> = vec![Vec::new(); p];
    let mut runs = 0usize;

    while runs < p_cfg.max_runs {
        let live: Vec<usize> = (0..p).filter(|&j| verdict[j] != Some(Verdict::Rejected)).collect();
        if live.is_empty() || verdict.iter().all(Option::is_some) {
            break;
        }
        runs += 1;

        let x = with_shadows(&m.features, &live, &mut rng);
        let n_cols = x.n_cols();
        let mtry = ((n_cols as f64).sqrt().floor() as usize).max(1);
        let rf = RandomForest::fit(&x, &m.response, mtry, &forest, cfg.seed.wrapping_add(runs as u64), true)?;
        let Some(imp) = rf.importance() else {
            return Err(PipelineError::IllPosed("importance forest returned no importance".into()));
        };
        let z: Vec<f64> = imp.scaled.iter().map(|v| if v.is_finite() { *v } else { 0.0 }).collect();
        let max_shadow = z[live.len()..].iter().copied().fold(f64::NEG_INFINITY, f64::max);

        for (k, &j) in live.iter().enumerate() {
            history[j].push(z[k]);
            if z[k] > max_shadow {
                hits[j] += 1;
            }
        }

        let undecided: Vec<usize> = (0..p).filter(|&j| verdict[j].is_none()).collect();
        let alpha = p_cfg.significance / undecided.len() as f64;
        let binom = Binomial::new(0.5, runs as u64).map_err(|e| PipelineError::IllPosed(e.to_string()))?;
        for j in undecided {
            let h = hits[j];
            // P(X ≥ h) and P(X ≤ h)
            let p_upper = if h == 0 { 1.0 } else { 1.0 - binom.cdf(h - 1) };
            let p_lower = binom.cdf(h);
            if p_upper < alpha {
                verdict[j] = Some(Verdict::Confirmed);
                debug!(predictor = %m.predictors[j], run = runs, hits = h, "confirmed");
            } else if p_lower < alpha {
                verdict[j] = Some(Verdict::Rejected);
                debug!(predictor = %m.predictors[j], run = runs, hits = h, "rejected");
            }
        }
    }

    let entries: Vec<PredictorVerdict> = (0..p)
        .map(|j| {
            let mut sorted = history[j].clone();
            sorted.sort_by(f64::total_cmp);
            PredictorVerdict {
                name: m.predictors[j].clone(),
                verdict: verdict[j].unwrap_or(Verdict::Tentative),
                hits: hits[j],
                median_importance: if sorted.is_empty() { f64::NAN } else { quantile_sorted(&sorted, 0.5) },
                mean_importance: mean(&history[j]),
            }
        })
        .collect();
    let set = VerdictSet { runs, entries };
    info!(
        runs,
        confirmed = set.with_verdict(Verdict::Confirmed).len(),
        tentative = set.with_verdict(Verdict::Tentative).len(),
        rejected = set.with_verdict(Verdict::Rejected).len(),
        "pre-selection finished"
    );
    Ok(set)
}

/// `live` columns of `x` followed by at least [`MIN_SHADOWS`] permuted copies.
fn with_shadows(x: &Matrix, live: &[usize], rng: &mut StdRng) -> Matrix {
    let n = x.n_rows();
    let n_shadow = live.len().max(MIN_SHADOWS);
    let mut cols: Vec<Vec<f64>> = live.iter().map(|&j| x.column(j)).collect();
    for s in 0..n_shadow {
        let mut shadow = x.column(live[s % live.len()]);
        shadow.shuffle(rng);
        cols.push(shadow);
    }
    debug_assert!(cols.iter().all(|c| c.len() == n));
    Matrix::from_columns(&cols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Position;
    use rand::Rng;

    /// Two informative predictors followed by three noise columns.
    fn matrix(n: usize, seed: u64) -> RegressionMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for _ in 0..n {
            let r: Vec<f64> = (0..5).map(|_| rng.gen_range(0.0..1.0)).collect();
            y.push(4.0 * r[0] + 3.0 * r[1] + rng.gen_range(-0.1..0.1));
            rows.push(r);
        }
        RegressionMatrix {
            predictors: ["depth", "bpi", "n1", "n2", "n3"].iter().map(|s| s.to_string()).collect(),
            features: Matrix::from_rows(&rows),
            response: y,
            positions: vec![Position::new(0.0, 0.0); n],
            stations: (0..n).map(|i| format!("s{i}")).collect(),
            excluded: Vec::new(),
        }
    }

    fn config() -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.preselection.max_runs = 25;
        cfg.preselection.n_trees = 40;
        cfg.forest.min_node_size = 3;
        cfg
    }

    #[test]
    fn informative_predictors_are_confirmed() {
        let m = matrix(150, 11);
        let set = preselect(&m, &config()).unwrap();
        assert_eq!(set.get("depth").unwrap().verdict, Verdict::Confirmed);
        assert_eq!(set.get("bpi").unwrap().verdict, Verdict::Confirmed);
        for noise in ["n1", "n2", "n3"] {
            assert_ne!(set.get(noise).unwrap().verdict, Verdict::Confirmed, "{noise}");
        }
        assert!(set.runs >= 1 && set.runs <= 25);
        assert!(set.get("depth").unwrap().median_importance > set.get("n1").unwrap().median_importance);
    }

    #[test]
    fn disabled_confirms_everything() {
        let m = matrix(20, 1);
        let mut cfg = config();
        cfg.preselection.enabled = false;
        let set = preselect(&m, &cfg).unwrap();
        assert_eq!(set.runs, 0);
        assert_eq!(set.passed(TentativePolicy::Drop).len(), 5);
        assert!(set.entries[0].mean_importance.is_nan());
    }

    #[test]
    fn tentative_policy_controls_pass_through() {
        let mut set = VerdictSet::all_confirmed(&["a".to_string(), "b".to_string(), "c".to_string()]);
        set.entries[1].verdict = Verdict::Tentative;
        set.entries[2].verdict = Verdict::Rejected;
        assert_eq!(set.passed(TentativePolicy::Drop), vec!["a".to_string()]);
        assert_eq!(set.passed(TentativePolicy::Keep), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn shadows_are_permutations() {
        let m = matrix(30, 2);
        let mut rng = StdRng::seed_from_u64(0);
        let x = with_shadows(&m.features, &[0, 3], &mut rng);
        assert_eq!(x.n_cols(), 2 + MIN_SHADOWS);
        let mut orig = m.features.column(0);
        let mut shadow = x.column(2);
        orig.sort_by(f64::total_cmp);
        shadow.sort_by(f64::total_cmp);
        assert_eq!(orig, shadow);
    }
}
