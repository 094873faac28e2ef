//! Spatial block partitioner.
//!
//! The bounding box of the samples is tiled into square blocks; whole blocks
//! are assigned to folds so that validation rows are spatially separated from
//! training rows by at least the block edge.
use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::coords::{Extent, Position};
use crate::error::{PipelineError, Result};
use crate::stats::std_dev;

const FOLD_SALT: u64 = 0xB10C_F01D;

/// Fold assignment for every row of a regression matrix.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialFolds {
    k: usize,
    block_size: f64,
    /// Fold (0..k) of each row.
    fold_of: Vec<usize>,
    /// Block (row, col) of each row.
    blocks: Vec<(usize, usize)>,
}

impl SpatialFolds {
    /// Partition `positions` into `k` folds of square blocks with edge
    /// `block_size`. Of `iterations` seeded block shuffles the one with the
    /// most even fold sizes is kept.
    pub fn partition(positions: &[Position], block_size: f64, k: usize, iterations: usize, seed: u64) -> Result<Self> {
        if k < 2 {
            return Err(PipelineError::Config(format!("spatial CV needs at least 2 folds, got {k}")));
        }
        if !(block_size.is_finite() && block_size > 0.0) {
            return Err(PipelineError::Config(format!("block size must be positive, got {block_size}")));
        }
        let Some(extent) = Extent::enclosing(positions) else {
            return Err(PipelineError::InsufficientBlocks { occupied: 0, folds: k });
        };

        let blocks: Vec<(usize, usize)> = positions
            .iter()
            .map(|p| {
                let row = ((p.y - extent.min_y) / block_size).floor() as usize;
                let col = ((p.x - extent.min_x) / block_size).floor() as usize;
                (row, col)
            })
            .collect();

        let mut members: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for b in &blocks {
            *members.entry(*b).or_default() += 1;
        }
        let occupied: Vec<((usize, usize), usize)> = members.into_iter().collect();
        if occupied.len() < k {
            return Err(PipelineError::InsufficientBlocks { occupied: occupied.len(), folds: k });
        }

        let mut rng = StdRng::seed_from_u64(seed ^ FOLD_SALT);
        let mut order: Vec<usize> = (0..occupied.len()).collect();
        let mut best: Option<(f64, Vec<usize>)> = None;
        for _ in 0..iterations.max(1) {
            order.shuffle(&mut rng);
            // block index → fold, round robin over the shuffled order
            let mut fold_of_block = vec![0usize; occupied.len()];
            let mut sizes = vec![0f64; k];
            for (slot, &b) in order.iter().enumerate() {
                fold_of_block[b] = slot % k;
                sizes[slot % k] += occupied[b].1 as f64;
            }
            let spread = std_dev(&sizes);
            if best.as_ref().map_or(true, |(s, _)| spread < *s) {
                best = Some((spread, fold_of_block));
            }
        }
        let fold_of_block = best.map(|(_, f)| f).unwrap_or_default();

        let fold_of = blocks
            .iter()
            .map(|b| {
                let idx = occupied.partition_point(|(key, _)| key < b);
                fold_of_block[idx]
            })
            .collect();

        Ok(Self { k, block_size, fold_of, blocks })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn block_size(&self) -> f64 {
        self.block_size
    }

    pub fn n_rows(&self) -> usize {
        self.fold_of.len()
    }

    pub fn fold_of(&self, row: usize) -> usize {
        self.fold_of[row]
    }

    pub fn block_of(&self, row: usize) -> (usize, usize) {
        self.blocks[row]
    }

    pub fn validation_indices(&self, fold: usize) -> Vec<usize> {
        (0..self.fold_of.len()).filter(|&i| self.fold_of[i] == fold).collect()
    }

    pub fn train_indices(&self, fold: usize) -> Vec<usize> {
        (0..self.fold_of.len()).filter(|&i| self.fold_of[i] != fold).collect()
    }

    pub fn fold_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for &f in &self.fold_of {
            sizes[f] += 1;
        }
        sizes
    }

    pub fn n_blocks(&self) -> usize {
        let mut b = self.blocks.clone();
        b.sort_unstable();
        b.dedup();
        b.len()
    }
}
