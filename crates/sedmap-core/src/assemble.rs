//! Per-cell prediction and back-transform to fraction grids.
use tracing::debug;

use crate::aoa::AoaMask;
use crate::compositional::{alr_inverse, alr_mud_inverse, Alr};
use crate::error::{PipelineError, Result};
use crate::forest::RandomForest;
use crate::grid::Grid;
use crate::parallel::par_map_range;
use crate::stack::PredictorStack;

/// Fraction grids of one channel, as proportions in [0, 1]. NaN is no-data.
#[derive(Debug, Clone)]
pub struct ChannelGrids {
    pub mud: Grid,
    pub sand: Option<Grid>,
    pub gravel: Option<Grid>,
}

impl ChannelGrids {
    pub fn named(&self) -> Vec<(&'static str, &Grid)> {
        let mut out = vec![("mud", &self.mud)];
        if let Some(g) = &self.sand {
            out.push(("sand", g));
        }
        if let Some(g) = &self.gravel {
            out.push(("gravel", g));
        }
        out
    }
}

/// Forest prediction for every cell of `stack`; NaN outside `aoi` or where
/// a predictor is missing.
pub fn predict_grid(
    forest: &RandomForest,
    predictors: &[String],
    stack: &PredictorStack,
    aoi: Option<&Grid>,
) -> Result<Grid> {
    let Some(geom) = stack.geometry() else {
        return Err(PipelineError::MissingPredictor(predictors.first().cloned().unwrap_or_default()));
    };
    if let Some(mask) = aoi {
        stack.ensure_aligned("aoi", mask)?;
    }
    let layers = stack.layers_for(predictors)?;
    let rows: Vec<Vec<f32>> = par_map_range(geom.height, |r| {
        let mut buf = Vec::with_capacity(layers.len());
        (0..geom.width)
            .map(|c| {
                let cell = r * geom.width + c;
                if aoi.is_some_and(|m| !m.is_set(cell)) || !PredictorStack::cell_features(&layers, cell, &mut buf) {
                    return f32::NAN;
                }
                forest.predict(&buf) as f32
            })
            .collect()
    });
    Ok(Grid::from_values(&geom, rows.into_iter().flatten().collect()))
}

fn check_same(a: &Grid, b: &Grid) -> Result<()> {
    if a.geometry().matches(&b.geometry()) && a.data.len() == b.data.len() {
        Ok(())
    } else {
        Err(PipelineError::NotCoRegistered { layer: "prediction".into() })
    }
}

/// Inverse ALR of the (alrM, alrG) grids. With AOA masks, a cell must be
/// inside both to be kept.
pub fn assemble_fractions(alr_m: &Grid, alr_g: &Grid, aoa: Option<(&AoaMask, &AoaMask)>) -> Result<ChannelGrids> {
    check_same(alr_m, alr_g)?;
    if let Some((a, b)) = aoa {
        check_same(alr_m, &a.di)?;
        check_same(alr_m, &b.di)?;
    }
    let geom = alr_m.geometry();
    let n = geom.n_cells();
    let mut mud = vec![f32::NAN; n];
    let mut sand = vec![f32::NAN; n];
    let mut gravel = vec![f32::NAN; n];
    let mut masked = 0usize;
    for cell in 0..n {
        let (m, g) = (alr_m.data[cell] as f64, alr_g.data[cell] as f64);
        if !(m.is_finite() && g.is_finite()) {
            continue;
        }
        if aoa.is_some_and(|(a, b)| !(a.inside[cell] && b.inside[cell])) {
            masked += 1;
            continue;
        }
        let comp = alr_inverse(Alr { alr_m: m, alr_g: g });
        mud[cell] = comp.mud as f32;
        sand[cell] = comp.sand as f32;
        gravel[cell] = comp.gravel as f32;
    }
    debug!(masked, "cells outside the AOA set to no-data");
    Ok(ChannelGrids {
        mud: Grid::from_values(&geom, mud),
        sand: Some(Grid::from_values(&geom, sand)),
        gravel: Some(Grid::from_values(&geom, gravel)),
    })
}

/// Mud proportion from the mud-only log-ratio grid.
pub fn assemble_mud(alr: &Grid, aoa: Option<&AoaMask>) -> Result<ChannelGrids> {
    if let Some(a) = aoa {
        check_same(alr, &a.di)?;
    }
    let data = alr
        .data
        .iter()
        .enumerate()
        .map(|(cell, &v)| {
            if !v.is_finite() || aoa.is_some_and(|a| !a.inside[cell]) {
                f32::NAN
            } else {
                alr_mud_inverse(v as f64) as f32
            }
        })
        .collect();
    Ok(ChannelGrids { mud: Grid::from_values(&alr.geometry(), data), sand: None, gravel: None })
}
