//! Pipeline configuration.
//!
//! One immutable [`PipelineConfig`] is passed to every stage. Every field has
//! a default, so a config file only needs to name what it changes.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::forest::ForestParams;
use crate::response::Channel;

// ── Stage sections ────────────────────────────────────────────────────────────

/// What happens to predictors Boruta leaves undecided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TentativePolicy {
    Drop,
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreselectionConfig {
    /// false marks every predictor Confirmed without fitting.
    pub enabled: bool,
    /// Family-wise significance level, Bonferroni-adjusted per run.
    pub significance: f64,
    pub max_runs: usize,
    /// Trees per importance forest.
    pub n_trees: usize,
    pub tentative: TentativePolicy,
}

impl Default for PreselectionConfig {
    fn default() -> Self {
        Self { enabled: true, significance: 0.05, max_runs: 500, n_trees: 300, tentative: TentativePolicy::Drop }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecorrelationConfig {
    /// Search stops once every retained predictor has VIF below this.
    pub vif_bound: f64,
    /// Decrement of the correlation threshold between steps.
    pub threshold_step: f64,
}

impl Default for DecorrelationConfig {
    fn default() -> Self {
        Self { vif_bound: 2.5, threshold_step: 0.01 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariogramConfig {
    pub n_lags: usize,
    /// Default: half the largest pairwise distance.
    pub max_lag: Option<f64>,
    pub min_samples: usize,
}

impl Default for VariogramConfig {
    fn default() -> Self {
        Self { n_lags: 15, max_lag: None, min_samples: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub folds: usize,
    /// Block edge = variogram range × multiplier.
    pub range_multiplier: f64,
    /// Explicit block edge; skips the variogram.
    pub block_size: Option<f64>,
    /// Seeded fold assignments tried; the most balanced one wins.
    pub iterations: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self { folds: 5, range_multiplier: 1.0, block_size: None, iterations: 100 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMetric {
    Rmse,
    RSquared,
}

impl SelectionMetric {
    pub fn name(self) -> &'static str {
        match self {
            Self::Rmse => "RMSE",
            Self::RSquared => "R²",
        }
    }

    /// True when `a` is strictly better than `b`.
    pub fn better(self, a: f64, b: f64) -> bool {
        match self {
            Self::Rmse => a < b,
            Self::RSquared => a > b,
        }
    }

    /// Worst possible score; anything finite beats it.
    pub fn worst(self) -> f64 {
        match self {
            Self::Rmse => f64::INFINITY,
            Self::RSquared => f64::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfsConfig {
    pub metric: SelectionMetric,
    /// Number of mtry values tried per subset.
    pub tune_length: usize,
    /// Warn when the number of subset evaluations exceeds this.
    pub warn_evaluations: usize,
}

impl Default for FfsConfig {
    fn default() -> Self {
        Self { metric: SelectionMetric::Rmse, tune_length: 3, warn_evaluations: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AoaConfig {
    /// Training DI only against rows in other CV folds.
    pub use_cv_folds: bool,
    /// Threshold = Q3 + multiplier · IQR of the training DI.
    pub iqr_multiplier: f64,
    /// Set fractions to no-data outside the AOA.
    pub mask_outside_aoa: bool,
}

impl Default for AoaConfig {
    fn default() -> Self {
        Self { use_cv_folds: false, iqr_multiplier: 1.5, mask_outside_aoa: true }
    }
}

// ── Top level ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub channels: Vec<Channel>,
    /// Allowed deviation of mud + sand + gravel from 100.
    pub fraction_tolerance: f64,
    /// Percentage substituted for zero mud or gravel before the log-ratio.
    pub zero_replacement: Option<f64>,
    /// Worker pool size; default available parallelism − 1.
    pub threads: Option<usize>,
    pub forest: ForestParams,
    pub preselection: PreselectionConfig,
    pub decorrelation: DecorrelationConfig,
    pub variogram: VariogramConfig,
    pub blocks: BlockConfig,
    pub ffs: FfsConfig,
    pub aoa: AoaConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            channels: vec![Channel::MudSandGravel, Channel::MudOnly],
            fraction_tolerance: 1.0,
            zero_replacement: Some(0.1),
            threads: None,
            forest: ForestParams::default(),
            preselection: PreselectionConfig::default(),
            decorrelation: DecorrelationConfig::default(),
            variogram: VariogramConfig::default(),
            blocks: BlockConfig::default(),
            ffs: FfsConfig::default(),
            aoa: AoaConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(PipelineError::Config(msg.to_string()));
        if self.channels.is_empty() {
            return bad("at least one channel is required");
        }
        if !(self.fraction_tolerance >= 0.0) {
            return bad("fraction_tolerance must be ≥ 0");
        }
        if self.zero_replacement.is_some_and(|d| !(d > 0.0 && d < 100.0)) {
            return bad("zero_replacement must lie in (0, 100)");
        }
        if self.threads == Some(0) {
            return bad("threads must be ≥ 1");
        }
        if self.forest.n_trees == 0 {
            return bad("forest.n_trees must be ≥ 1");
        }
        if !(self.forest.sample_fraction > 0.0 && self.forest.sample_fraction <= 1.0) {
            return bad("forest.sample_fraction must lie in (0, 1]");
        }
        let p = &self.preselection;
        if !(p.significance > 0.0 && p.significance < 1.0) {
            return bad("preselection.significance must lie in (0, 1)");
        }
        if p.enabled && (p.max_runs == 0 || p.n_trees == 0) {
            return bad("preselection needs max_runs ≥ 1 and n_trees ≥ 1");
        }
        let d = &self.decorrelation;
        if !(d.vif_bound > 1.0) {
            return bad("decorrelation.vif_bound must be > 1");
        }
        if !(d.threshold_step > 0.0 && d.threshold_step <= 1.0) {
            return bad("decorrelation.threshold_step must lie in (0, 1]");
        }
        if self.variogram.n_lags < 3 {
            return bad("variogram.n_lags must be ≥ 3");
        }
        if self.variogram.max_lag.is_some_and(|l| !(l > 0.0)) {
            return bad("variogram.max_lag must be > 0");
        }
        let b = &self.blocks;
        if b.folds < 2 {
            return bad("blocks.folds must be ≥ 2");
        }
        if b.iterations == 0 {
            return bad("blocks.iterations must be ≥ 1");
        }
        if !(b.range_multiplier > 0.0) {
            return bad("blocks.range_multiplier must be > 0");
        }
        if b.block_size.is_some_and(|s| !(s > 0.0)) {
            return bad("blocks.block_size must be > 0");
        }
        if self.ffs.tune_length == 0 {
            return bad("ffs.tune_length must be ≥ 1");
        }
        if !(self.aoa.iqr_multiplier >= 0.0) {
            return bad("aoa.iqr_multiplier must be ≥ 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.decorrelation.vif_bound, 2.5);
        assert_eq!(cfg.blocks.iterations, 100);
        assert_eq!(cfg.preselection.tentative, TentativePolicy::Drop);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = PipelineConfig::from_json_str(
            r#"{ "seed": 7, "channels": ["mud-only"], "blocks": { "folds": 3 }, "ffs": { "metric": "r-squared" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.channels, vec![Channel::MudOnly]);
        assert_eq!(cfg.blocks.folds, 3);
        assert_eq!(cfg.blocks.iterations, 100);
        assert_eq!(cfg.ffs.metric, SelectionMetric::RSquared);
        assert_eq!(cfg.forest.n_trees, 500);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PipelineConfig::from_json_str(r#"{ "blocks": { "folds": 1 } }"#).is_err());
        assert!(PipelineConfig::from_json_str(r#"{ "channels": [] }"#).is_err());
        assert!(PipelineConfig::from_json_str(r#"{ "zero_replacement": 0.0 }"#).is_err());
        assert!(PipelineConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn metric_ordering() {
        assert!(SelectionMetric::Rmse.better(0.5, 0.6));
        assert!(SelectionMetric::RSquared.better(0.6, 0.5));
        assert!(SelectionMetric::Rmse.better(3.0, SelectionMetric::Rmse.worst()));
    }
}
