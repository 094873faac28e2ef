//! Pipeline orchestrator: runs every stage of a channel in order.
//!
//! samples → log-ratio response → regression matrix → pre-selection →
//! decorrelation → spatial folds → forward selection → AOA → prediction →
//! back-transform. Channels are independent; one failing channel does not
//! stop the others.
use tracing::{error, info, info_span};

use crate::aoa::{AoaMask, AoaModel};
use crate::assemble::{assemble_fractions, assemble_mud, predict_grid, ChannelGrids};
use crate::config::PipelineConfig;
use crate::coords::Crs;
use crate::error::{PipelineError, Result};
use crate::grid::Grid;
use crate::parallel::{with_pool, worker_count};
use crate::regression::{ExcludedRow, RegressionMatrix};
use crate::report::SampleRecord;
use crate::response::{Channel, Response};
use crate::samples::{validate_samples, Sample};
use crate::select::{decorrelate, forward_select, preselect, DecorrelationResult, FfsReport, VerdictSet};
use crate::spatial::{spatial_folds, BlockSizing, SpatialFolds};
use crate::stack::PredictorStack;

// ── Results ──────────────────────────────────────────────────────────────────

/// Everything fitted for one log-ratio response.
#[derive(Debug, Clone)]
pub struct ResponseRun {
    pub response: Response,
    pub n_rows: usize,
    pub excluded: Vec<ExcludedRow>,
    pub verdicts: VerdictSet,
    pub decorrelation: DecorrelationResult,
    pub sizing: BlockSizing,
    pub folds: SpatialFolds,
    pub ffs: FfsReport,
    pub aoa_model: AoaModel,
    pub aoa: AoaMask,
    /// Predicted log-ratio per cell.
    pub prediction: Grid,
}

#[derive(Debug, Clone)]
pub struct ChannelRun {
    pub channel: Channel,
    pub responses: Vec<ResponseRun>,
    pub grids: ChannelGrids,
}

#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub result: Result<ChannelRun>,
}

/// Output bundle of a pipeline run.
#[derive(Debug)]
pub struct RunArtifacts {
    pub crs: Crs,
    pub samples: Vec<SampleRecord>,
    pub channels: Vec<ChannelOutcome>,
}

impl RunArtifacts {
    pub fn failed(&self) -> impl Iterator<Item = &ChannelOutcome> {
        self.channels.iter().filter(|c| c.result.is_err())
    }
}

// ── Stages ───────────────────────────────────────────────────────────────────

/// Fit one response: selection, folds, final model, AOA and prediction grid.
pub fn run_response(
    response: Response,
    samples: &[Sample],
    stack: &PredictorStack,
    aoi: Option<&Grid>,
    cfg: &PipelineConfig,
) -> Result<ResponseRun> {
    let span = info_span!("response", name = response.name());
    let _enter = span.enter();

    let values = response.values(samples, cfg.zero_replacement)?;
    let m = RegressionMatrix::build(samples, &values, stack)?;
    info!(rows = m.n_rows(), predictors = m.predictors.len(), excluded = m.excluded.len(), "regression matrix built");

    let verdicts = preselect(&m, cfg)?;
    let passed = verdicts.passed(cfg.preselection.tentative);
    if passed.is_empty() {
        return Err(PipelineError::InsufficientPredictors);
    }
    let decorrelation = decorrelate(&m, &passed, &cfg.decorrelation)?;
    let (folds, sizing) = spatial_folds(&m.positions, &m.response, cfg)?;
    let ffs = forward_select(&m, &decorrelation.retained, &folds, cfg)?;

    let aoa_model = AoaModel::fit(&m, &ffs.model, Some(&folds), &cfg.aoa)?;
    let aoa = aoa_model.apply(stack, aoi)?;
    let prediction = predict_grid(&ffs.model.forest, &ffs.model.predictors, stack, aoi)?;

    Ok(ResponseRun {
        response,
        n_rows: m.n_rows(),
        excluded: m.excluded,
        verdicts,
        decorrelation,
        sizing,
        folds,
        ffs,
        aoa_model,
        aoa,
        prediction,
    })
}

/// Run every response of `channel` and assemble its fraction grids.
pub fn run_channel(
    channel: Channel,
    samples: &[Sample],
    stack: &PredictorStack,
    aoi: Option<&Grid>,
    cfg: &PipelineConfig,
) -> Result<ChannelRun> {
    let span = info_span!("channel", name = channel.name());
    let _enter = span.enter();

    let responses = channel
        .responses()
        .iter()
        .map(|&r| run_response(r, samples, stack, aoi, cfg))
        .collect::<Result<Vec<_>>>()?;

    let mask = cfg.aoa.mask_outside_aoa;
    let grids = match (channel, responses.as_slice()) {
        (Channel::MudSandGravel, [m, g]) => {
            assemble_fractions(&m.prediction, &g.prediction, mask.then_some((&m.aoa, &g.aoa)))?
        }
        (Channel::MudOnly, [m]) => assemble_mud(&m.prediction, mask.then_some(&m.aoa))?,
        _ => return Err(PipelineError::IllPosed(format!("unexpected responses for channel {}", channel.name()))),
    };
    info!(cells = grids.mud.valid_count(), "fraction grids assembled");
    Ok(ChannelRun { channel, responses, grids })
}

/// Validate inputs, then run every configured channel inside a bounded
/// worker pool.
pub fn run_pipeline(
    samples: &[Sample],
    stack: &PredictorStack,
    aoi: Option<&Grid>,
    cfg: &PipelineConfig,
) -> Result<RunArtifacts> {
    cfg.validate()?;
    let crs = validate_samples(samples, cfg.fraction_tolerance)?;
    if &crs != stack.crs() {
        return Err(PipelineError::MixedCrs {
            station: "predictor stack".into(),
            expected: crs.to_string(),
            found: stack.crs().to_string(),
        });
    }
    if let Some(mask) = aoi {
        stack.ensure_aligned("aoi", mask)?;
    }
    let records = samples.iter().map(|s| SampleRecord::from_sample(s, cfg.zero_replacement)).collect();

    let threads = worker_count(cfg.threads);
    info!(samples = samples.len(), layers = stack.names().len(), threads, seed = cfg.seed, "pipeline started");
    let channels = with_pool(threads, || {
        cfg.channels
            .iter()
            .map(|&channel| {
                let result = run_channel(channel, samples, stack, aoi, cfg);
                if let Err(e) = &result {
                    error!(channel = channel.name(), kind = ?e.kind(), "channel failed: {e}");
                }
                ChannelOutcome { channel, result }
            })
            .collect::<Vec<_>>()
    })?;

    Ok(RunArtifacts { crs, samples: records, channels })
}
