/// Batch runner: reads samples, a predictor stack and an optional AOI mask
/// as JSON, runs every configured channel and writes the output bundle.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sedmap_core::grid::Grid;
use sedmap_core::pipeline::ChannelRun;
use sedmap_core::report::render_run_log;
use sedmap_core::samples::{synthesize_all, CategoricalObservation, Sample};
use sedmap_core::stack::{PredictorStack, StackFile};
use sedmap_core::{run_pipeline, Channel, PipelineConfig};

/// Salt for the synthetic-sample random stream.
const SYNTH_SALT: u64 = 0xC1A5_5E5D;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sedmap-run", about = "Map seafloor sediment fractions from samples and a predictor stack")]
struct Args {
    /// Pipeline configuration JSON (defaults apply to omitted fields)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Measured samples JSON (array of samples)
    #[arg(short, long)]
    samples: PathBuf,

    /// Class-labelled observations to convert into synthetic samples
    #[arg(long)]
    categorical: Option<PathBuf>,

    /// Predictor stack JSON ({ "crs": ..., "layers": { name: grid } })
    #[arg(long)]
    stack: PathBuf,

    /// Area-of-interest mask grid; non-zero cells are mapped
    #[arg(long)]
    aoi: Option<PathBuf>,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Run only these channels (overrides the config)
    #[arg(long, value_enum)]
    channel: Vec<ChannelArg>,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the worker pool size
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ChannelArg {
    MudSandGravel,
    MudOnly,
}

impl From<ChannelArg> for Channel {
    fn from(c: ChannelArg) -> Self {
        match c {
            ChannelArg::MudSandGravel => Channel::MudSandGravel,
            ChannelArg::MudOnly => Channel::MudOnly,
        }
    }
}

// ── I/O ──────────────────────────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {what} {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {what} {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write {}", path.display()))
}

fn write_channel(dir: &Path, run: &ChannelRun, date: &str, n_samples: usize) -> Result<()> {
    let ch = run.channel.name();
    for (fraction, grid) in run.grids.named() {
        write_json(&dir.join(format!("{ch}_{fraction}_{date}.json")), grid)?;
    }
    for r in &run.responses {
        let resp = r.response.name();
        write_json(&dir.join(format!("{ch}_{resp}_di_{date}.json")), &r.aoa.di)?;
        write_json(&dir.join(format!("{ch}_{resp}_aoa_{date}.json")), &r.aoa.inside_grid())?;
        write_json(&dir.join(format!("{ch}_{resp}_model_{date}.json")), &r.ffs.model)?;
    }
    let log_path = dir.join(format!("{ch}_runlog_{date}.txt"));
    fs::write(&log_path, render_run_log(run, date, n_samples))
        .with_context(|| format!("Cannot write {}", log_path.display()))?;
    info!(channel = ch, dir = %dir.display(), "outputs written");
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Invalid config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if !args.channel.is_empty() {
        cfg.channels = args.channel.iter().map(|&c| c.into()).collect();
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    if args.threads.is_some() {
        cfg.threads = args.threads;
    }
    cfg.validate().context("Invalid configuration")?;

    let mut samples: Vec<Sample> = read_json(&args.samples, "samples")?;
    if let Some(path) = &args.categorical {
        let obs: Vec<CategoricalObservation> = read_json(path, "categorical observations")?;
        let mut rng = StdRng::seed_from_u64(cfg.seed ^ SYNTH_SALT);
        let synthetic = synthesize_all(&obs, &mut rng);
        info!(measured = samples.len(), synthetic = synthetic.len(), "synthetic samples added");
        samples.extend(synthetic);
    }

    let stack_file: StackFile = read_json(&args.stack, "predictor stack")?;
    let stack = PredictorStack::from_file(stack_file).context("Predictor stack is not co-registered")?;
    let aoi: Option<Grid> = args.aoi.as_deref().map(|p| read_json(p, "AOI mask")).transpose()?;

    let artifacts = run_pipeline(&samples, &stack, aoi.as_ref(), &cfg).context("Pipeline input rejected")?;

    let date = chrono::Local::now().format("%Y%m%d").to_string();
    fs::create_dir_all(&args.output)
        .with_context(|| format!("Cannot create {}", args.output.display()))?;
    write_json(&args.output.join(format!("samples_{date}.json")), &artifacts.samples)?;

    let mut failed = Vec::new();
    for outcome in &artifacts.channels {
        match &outcome.result {
            Ok(run) => write_channel(&args.output, run, &date, samples.len())?,
            Err(e) => {
                error!(channel = outcome.channel.name(), kind = ?e.kind(), "{e}");
                failed.push(outcome.channel.name());
            }
        }
    }

    if !failed.is_empty() {
        bail!("{} channel(s) failed: {}", failed.len(), failed.join(", "));
    }
    info!(channels = artifacts.channels.len(), crs = %artifacts.crs, "run complete");
    Ok(())
}
