//! Correlation-threshold elimination driven by a VIF target.
//!
//! The threshold starts at 1 and decreases by a fixed step. At each level the
//! most-correlated surviving pair above the threshold loses the member with
//! the larger VIF, until no pair exceeds it. The search ends at the first
//! level where every survivor has VIF below the bound.
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DecorrelationConfig;
use crate::error::{PipelineError, Result};
use crate::regression::RegressionMatrix;
use crate::stats::{ols_r_squared, pearson_r, std_dev};

#[derive(Debug, Clone, Serialize)]
pub struct DecorrelationStep {
    pub threshold: f64,
    pub removed: Vec<String>,
    pub retained: usize,
    pub max_vif: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecorrelationResult {
    pub retained: Vec<String>,
    pub removed: Vec<String>,
    pub max_vif: f64,
    pub threshold: f64,
    pub history: Vec<DecorrelationStep>,
}

/// VIF of column `i` against the other `active` columns. ∞ when the fit is
/// singular or exact.
pub fn vif(columns: &[Vec<f64>], active: &[usize], i: usize) -> f64 {
    let others: Vec<&[f64]> = active.iter().filter(|&&j| j != i).map(|&j| columns[j].as_slice()).collect();
    match ols_r_squared(&columns[i], &others) {
        Some(r2) if r2 < 1.0 - 1e-12 => 1.0 / (1.0 - r2),
        _ => f64::INFINITY,
    }
}

pub fn max_vif(columns: &[Vec<f64>], active: &[usize]) -> f64 {
    if active.len() < 2 {
        return 1.0;
    }
    active.iter().map(|&i| vif(columns, active, i)).fold(1.0, f64::max)
}

/// Most-correlated pair with |r| > `threshold`, as positions into `active`.
fn worst_pair(columns: &[Vec<f64>], active: &[usize], threshold: f64) -> Option<(usize, usize)> {
    let mut best: Option<(f64, usize, usize)> = None;
    for a in 0..active.len() {
        for b in (a + 1)..active.len() {
            let r = pearson_r(&columns[active[a]], &columns[active[b]]).abs();
            if r > threshold && best.map_or(true, |(br, _, _)| r > br) {
                best = Some((r, a, b));
            }
        }
    }
    best.map(|(_, a, b)| (a, b))
}

/// Decorrelate `candidates` (columns of `m`).
pub fn decorrelate(m: &RegressionMatrix, candidates: &[String], cfg: &DecorrelationConfig) -> Result<DecorrelationResult> {
    if candidates.is_empty() {
        return Err(PipelineError::InsufficientPredictors);
    }
    let idx = m.column_indices(candidates)?;
    let columns: Vec<Vec<f64>> = idx.iter().map(|&j| m.features.column(j)).collect();

    let mut removed = Vec::new();
    let mut active: Vec<usize> = Vec::with_capacity(columns.len());
    for (k, c) in columns.iter().enumerate() {
        if std_dev(c).is_finite() && std_dev(c) > 0.0 {
            active.push(k);
        } else {
            warn!(predictor = %candidates[k], "constant predictor removed");
            removed.push(candidates[k].clone());
        }
    }
    if active.is_empty() {
        return Err(PipelineError::InsufficientPredictors);
    }

    let n_steps = (1.0 / cfg.threshold_step).ceil() as usize;
    let mut history = Vec::new();
    for s in 0..=n_steps {
        let threshold = (1.0 - s as f64 * cfg.threshold_step).max(0.0);
        let mut step_removed = Vec::new();
        while let Some((a, b)) = worst_pair(&columns, &active, threshold) {
            let va = vif(&columns, &active, active[a]);
            let vb = vif(&columns, &active, active[b]);
            let drop = if va > vb { a } else { b };
            let k = active.remove(drop);
            step_removed.push(candidates[k].clone());
        }
        let mv = max_vif(&columns, &active);
        debug!(threshold, retained = active.len(), max_vif = mv, removed = ?step_removed, "decorrelation step");
        removed.extend(step_removed.iter().cloned());
        history.push(DecorrelationStep { threshold, removed: step_removed, retained: active.len(), max_vif: mv });

        if mv < cfg.vif_bound {
            let retained: Vec<String> = active.iter().map(|&k| candidates[k].clone()).collect();
            info!(threshold, max_vif = mv, retained = ?retained, "decorrelation converged");
            return Ok(DecorrelationResult { retained, removed, max_vif: mv, threshold, history });
        }
        if threshold <= 0.0 {
            return Err(PipelineError::VifSearchExhausted { max_vif: mv, retained: active.len() });
        }
    }
    let mv = max_vif(&columns, &active);
    Err(PipelineError::VifSearchExhausted { max_vif: mv, retained: active.len() })
}
