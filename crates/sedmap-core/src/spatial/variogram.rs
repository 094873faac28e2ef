//! Empirical semivariogram and parametric fit.
//!
//! ```text
//! γ(h) = (1/2N(h)) Σ [z(xᵢ) - z(xⱼ)]²   over pairs with |xᵢ-xⱼ| in the lag bin
//! ```
//!
//! Spherical, exponential and Gaussian models are fitted by pair-count
//! weighted least squares: a coarse grid over (nugget, sill, range) followed by
//! a finer grid around the best coarse cell. The model with the lowest
//! weighted RSS wins and its range sizes the spatial CV blocks.
use serde::Serialize;

use crate::config::VariogramConfig;
use crate::coords::Position;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct EmpiricalVariogram {
    /// Bin centres.
    pub lags: Vec<f64>,
    /// γ(h) per bin; NaN for empty bins.
    pub semivariance: Vec<f64>,
    pub pair_counts: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariogramModel {
    /// γ(h) = c₀ + c·[1.5(h/a) − 0.5(h/a)³] for h ≤ a; c₀ + c beyond.
    Spherical,
    /// γ(h) = c₀ + c·[1 − exp(−3h/a)]
    Exponential,
    /// γ(h) = c₀ + c·[1 − exp(−3h²/a²)]
    Gaussian,
}

#[derive(Debug, Clone, Serialize)]
pub struct FittedVariogram {
    pub model: VariogramModel,
    pub nugget: f64,
    pub sill: f64,
    /// Distance at which γ reaches (about) the sill.
    pub range: f64,
    pub partial_sill: f64,
    /// Pair-weighted residual sum of squares.
    pub rss: f64,
}

impl FittedVariogram {
    pub fn evaluate(&self, h: f64) -> f64 {
        if h < 1e-15 {
            return 0.0;
        }
        let (c0, c, a) = (self.nugget, self.partial_sill, self.range);
        match self.model {
            VariogramModel::Spherical => {
                if h >= a {
                    c0 + c
                } else {
                    let hr = h / a;
                    c0 + c * (1.5 * hr - 0.5 * hr * hr * hr)
                }
            }
            VariogramModel::Exponential => c0 + c * (1.0 - (-3.0 * h / a).exp()),
            VariogramModel::Gaussian => c0 + c * (1.0 - (-3.0 * h * h / (a * a)).exp()),
        }
    }
}

fn fit_err(msg: impl Into<String>) -> PipelineError {
    PipelineError::VariogramFit(msg.into())
}

pub fn empirical_variogram(positions: &[Position], values: &[f64], cfg: &VariogramConfig) -> Result<EmpiricalVariogram> {
    let n = positions.len();
    if n < cfg.min_samples.max(2) {
        return Err(fit_err(format!("{n} samples, need at least {}", cfg.min_samples.max(2))));
    }
    if values.len() != n {
        return Err(fit_err("positions and values differ in length"));
    }
    if cfg.n_lags < 3 {
        return Err(fit_err(format!("{} lag bins, need at least 3", cfg.n_lags)));
    }

    let max_lag = match cfg.max_lag {
        Some(m) => m,
        None => {
            let mut max_dist = 0f64;
            for i in 0..n {
                for j in (i + 1)..n {
                    max_dist = max_dist.max(positions[i].distance(&positions[j]));
                }
            }
            max_dist / 2.0
        }
    };
    if !(max_lag > 0.0) {
        return Err(fit_err("maximum lag is zero (coincident samples)"));
    }

    let n_lags = cfg.n_lags;
    let bin_width = max_lag / n_lags as f64;
    let lags: Vec<f64> = (0..n_lags).map(|k| (k as f64 + 0.5) * bin_width).collect();
    let mut semivariance = vec![0f64; n_lags];
    let mut pair_counts = vec![0usize; n_lags];

    for i in 0..n {
        for j in (i + 1)..n {
            let d = positions[i].distance(&positions[j]);
            if d > max_lag {
                continue;
            }
            let bin = ((d / bin_width) as usize).min(n_lags - 1);
            let dz = values[i] - values[j];
            semivariance[bin] += dz * dz;
            pair_counts[bin] += 1;
        }
    }
    for k in 0..n_lags {
        semivariance[k] = if pair_counts[k] > 0 {
            semivariance[k] / (2.0 * pair_counts[k] as f64)
        } else {
            f64::NAN
        };
    }

    Ok(EmpiricalVariogram { lags, semivariance, pair_counts })
}

fn weighted_rss(trial: &FittedVariogram, valid: &[(f64, f64, usize)]) -> f64 {
    valid
        .iter()
        .map(|&(lag, sv, cnt)| {
            let r = sv - trial.evaluate(lag);
            cnt as f64 * r * r
        })
        .sum()
}

pub fn fit_variogram(empirical: &EmpiricalVariogram, model: VariogramModel) -> Result<FittedVariogram> {
    let valid: Vec<(f64, f64, usize)> = empirical
        .lags
        .iter()
        .zip(&empirical.semivariance)
        .zip(&empirical.pair_counts)
        .filter(|((_, sv), cnt)| sv.is_finite() && **cnt > 0)
        .map(|((&lag, &sv), &cnt)| (lag, sv, cnt))
        .collect();

    if valid.len() < 3 {
        return Err(fit_err(format!("{} populated lag bins, need at least 3", valid.len())));
    }
    let max_lag = valid.iter().map(|v| v.0).fold(0f64, f64::max);
    let max_sv = valid.iter().map(|v| v.1).fold(0f64, f64::max);
    if max_sv <= 0.0 {
        return Err(fit_err("all semivariances are zero"));
    }

    let trial = |nugget: f64, sill: f64, range: f64| {
        let mut t = FittedVariogram { model, nugget, sill, range, partial_sill: sill - nugget, rss: 0.0 };
        t.rss = weighted_rss(&t, &valid);
        t
    };

    // coarse grid
    let (n_nugget, n_sill, n_range) = (10, 10, 20);
    let nugget_step = max_sv / (2.0 * n_nugget as f64);
    let sill_step = max_sv / n_sill as f64;
    let range_step = 2.0 * max_lag / n_range as f64;
    let mut best: Option<FittedVariogram> = None;
    for i_n in 0..=n_nugget {
        let nugget = nugget_step * i_n as f64;
        for i_s in 1..=n_sill {
            let sill = sill_step * i_s as f64;
            if sill <= nugget {
                continue;
            }
            for i_r in 1..=n_range {
                let t = trial(nugget, sill, range_step * i_r as f64);
                if best.as_ref().map_or(true, |b| t.rss < b.rss) {
                    best = Some(t);
                }
            }
        }
    }
    let Some(coarse) = best else {
        return Err(fit_err("no admissible parameters"));
    };

    // fine grid: ±1 coarse step around the best cell, 10 subdivisions
    let mut best = coarse.clone();
    let sub = 10;
    for i_n in -sub..=sub {
        let nugget = (coarse.nugget + nugget_step * i_n as f64 / sub as f64).max(0.0);
        for i_s in -sub..=sub {
            let sill = coarse.sill + sill_step * i_s as f64 / sub as f64;
            if sill <= nugget {
                continue;
            }
            for i_r in -sub..=sub {
                let range = coarse.range + range_step * i_r as f64 / sub as f64;
                if range <= 0.0 {
                    continue;
                }
                let t = trial(nugget, sill, range);
                if t.rss < best.rss {
                    best = t;
                }
            }
        }
    }

    if best.partial_sill < 0.01 * best.sill {
        return Err(fit_err("partial sill vanishes (pure nugget)"));
    }
    if !(best.range.is_finite() && best.range > 0.0) {
        return Err(fit_err(format!("fitted range {} is not positive", best.range)));
    }
    Ok(best)
}

/// Fit all three models and keep the lowest RSS.
pub fn fit_best_variogram(empirical: &EmpiricalVariogram) -> Result<FittedVariogram> {
    let mut best: Option<FittedVariogram> = None;
    let mut last_err = None;
    for model in [VariogramModel::Spherical, VariogramModel::Exponential, VariogramModel::Gaussian] {
        match fit_variogram(empirical, model) {
            Ok(f) if best.as_ref().map_or(true, |b| f.rss < b.rss) => best = Some(f),
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
    }
    match (best, last_err) {
        (Some(b), _) => Ok(b),
        (None, Some(e)) => Err(e),
        (None, None) => Err(fit_err("no model could be fitted")),
    }
}

/// Autocorrelation range of `values` at `positions`.
pub fn estimate_range(positions: &[Position], values: &[f64], cfg: &VariogramConfig) -> Result<FittedVariogram> {
    let emp = empirical_variogram(positions, values, cfg)?;
    fit_best_variogram(&emp)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points on a jittered lattice with a smooth field of known scale.
    fn correlated_field(n_side: usize, seed: u64) -> (Vec<Position>, Vec<f64>) {
        let mut rng = seed;
        let mut pos = Vec::new();
        let mut val = Vec::new();
        for i in 0..n_side {
            for j in 0..n_side {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let jitter = (rng >> 33) as f64 / (1u64 << 31) as f64;
                let x = i as f64 * 10.0 + jitter * 3.0;
                let y = j as f64 * 10.0 + jitter * 2.0;
                pos.push(Position::new(x, y));
                val.push((x / 40.0).sin() + (y / 40.0).cos());
            }
        }
        (pos, val)
    }

    #[test]
    fn empirical_variogram_increases_with_lag() {
        let (pos, val) = correlated_field(12, 1);
        let emp = empirical_variogram(&pos, &val, &VariogramConfig::default()).unwrap();
        assert_eq!(emp.lags.len(), 15);
        let first = emp.semivariance.iter().copied().find(|v| v.is_finite()).unwrap();
        let later = emp.semivariance[10];
        assert!(later > first, "γ should grow: {first} vs {later}");
    }

    #[test]
    fn smooth_field_gives_positive_finite_range() {
        let (pos, val) = correlated_field(12, 2);
        let fit = estimate_range(&pos, &val, &VariogramConfig::default()).unwrap();
        assert!(fit.range.is_finite() && fit.range > 0.0);
        assert!(fit.partial_sill > 0.0);
        assert_eq!(fit.evaluate(0.0), 0.0);
    }

    #[test]
    fn degenerate_inputs_fail() {
        let cfg = VariogramConfig::default();
        let (pos, val) = correlated_field(2, 3);
        assert!(matches!(estimate_range(&pos, &val, &cfg), Err(PipelineError::VariogramFit(_))));

        let same = vec![Position::new(1.0, 1.0); 20];
        assert!(estimate_range(&same, &[1.0; 20], &cfg).is_err());

        let (pos, _) = correlated_field(6, 4);
        let flat = vec![3.0; pos.len()];
        assert!(estimate_range(&pos, &flat, &cfg).is_err());
    }

    #[test]
    fn too_few_lag_bins_fail() {
        let (pos, val) = correlated_field(6, 5);
        for n_lags in [0, 2] {
            let cfg = VariogramConfig { n_lags, ..Default::default() };
            assert!(matches!(empirical_variogram(&pos, &val, &cfg), Err(PipelineError::VariogramFit(_))));
            assert!(matches!(estimate_range(&pos, &val, &cfg), Err(PipelineError::VariogramFit(_))));
        }
    }
}
