//! Spatial structure: autocorrelation range and block cross-validation folds.
pub mod blocks;
pub mod variogram;

use tracing::info;

use crate::config::PipelineConfig;
use crate::coords::Position;
use crate::error::Result;
pub use blocks::SpatialFolds;
pub use variogram::{estimate_range, FittedVariogram};

/// Block edge and the variogram it came from (None when overridden).
#[derive(Debug, Clone)]
pub struct BlockSizing {
    pub block_size: f64,
    pub variogram: Option<FittedVariogram>,
}

/// Resolve the block edge: the configured override, else the variogram range
/// of `values` times the range multiplier.
pub fn block_sizing(positions: &[Position], values: &[f64], cfg: &PipelineConfig) -> Result<BlockSizing> {
    if let Some(size) = cfg.blocks.block_size {
        info!(block_size = size, "using configured block size");
        return Ok(BlockSizing { block_size: size, variogram: None });
    }
    let fit = estimate_range(positions, values, &cfg.variogram)?;
    let block_size = fit.range * cfg.blocks.range_multiplier;
    info!(model = ?fit.model, range = fit.range, nugget = fit.nugget, sill = fit.sill, block_size, "variogram fitted");
    Ok(BlockSizing { block_size, variogram: Some(fit) })
}

/// Block sizing followed by the fold partition.
pub fn spatial_folds(positions: &[Position], values: &[f64], cfg: &PipelineConfig) -> Result<(SpatialFolds, BlockSizing)> {
    let sizing = block_sizing(positions, values, cfg)?;
    let folds = SpatialFolds::partition(positions, sizing.block_size, cfg.blocks.folds, cfg.blocks.iterations, cfg.seed)?;
    info!(
        folds = folds.k(),
        blocks = folds.n_blocks(),
        sizes = ?folds.fold_sizes(),
        "spatial folds assigned"
    );
    Ok((folds, sizing))
}
