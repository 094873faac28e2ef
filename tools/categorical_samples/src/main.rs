/// Synthetic sample tool: converts class-labelled seabed observations into
/// samples with fractions drawn from the class's constrained ranges.
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sedmap_core::samples::{synthesize_all, validate_samples, CategoricalObservation};

#[derive(Parser, Debug)]
#[command(name = "categorical_samples", about = "Draw synthetic grain-size samples for sediment-class observations")]
struct Args {
    /// Observations JSON (array of { station, source, crs, position, class })
    #[arg(short, long)]
    input: PathBuf,

    /// Output samples JSON
    #[arg(short, long, default_value = "data/synthetic_samples.json")]
    output: PathBuf,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("Cannot read {}", args.input.display()))?;
    let obs: Vec<CategoricalObservation> =
        serde_json::from_str(&text).context("Failed to parse observations")?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let samples = synthesize_all(&obs, &mut rng);
    validate_samples(&samples, 1e-6).context("Synthetic samples failed validation")?;

    let mut per_class: BTreeMap<String, usize> = BTreeMap::new();
    for o in &obs {
        *per_class.entry(format!("{:?}", o.class)).or_default() += 1;
    }
    for (class, n) in &per_class {
        info!(class = %class, samples = n, "synthesized");
    }

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.output, serde_json::to_string_pretty(&samples)?)
        .with_context(|| format!("Cannot write {}", args.output.display()))?;
    info!(samples = samples.len(), output = %args.output.display(), "done");
    Ok(())
}
