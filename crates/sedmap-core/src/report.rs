//! Run-log text and the samples table.
use serde::{Deserialize, Serialize};

use crate::compositional::{alr_forward, alr_mud_forward};
use crate::coords::Crs;
use crate::pipeline::{ChannelRun, ResponseRun};
use crate::samples::{Provenance, Sample};
use crate::select::Verdict;

/// One row of the samples output: the sample plus its log-ratio columns
/// (None where undefined).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub station: String,
    pub source: String,
    pub provenance: Provenance,
    pub crs: Crs,
    pub x: f64,
    pub y: f64,
    pub mud: f64,
    pub sand: f64,
    pub gravel: f64,
    pub alr_m: Option<f64>,
    pub alr_g: Option<f64>,
    pub alr_mud: Option<f64>,
}

impl SampleRecord {
    pub fn from_sample(s: &Sample, zero_replacement: Option<f64>) -> Self {
        let f = match zero_replacement {
            Some(delta) => s.fractions.with_zero_numerators_replaced(delta),
            None => s.fractions,
        };
        let alr = alr_forward(&f).ok();
        Self {
            station: s.station.clone(),
            source: s.source.clone(),
            provenance: s.provenance.clone(),
            crs: s.crs.clone(),
            x: s.position.x,
            y: s.position.y,
            mud: s.fractions.mud,
            sand: s.fractions.sand,
            gravel: s.fractions.gravel,
            alr_m: alr.map(|a| a.alr_m),
            alr_g: alr.map(|a| a.alr_g),
            alr_mud: alr_mud_forward(&f).ok(),
        }
    }
}

fn response_section(out: &mut Vec<String>, r: &ResponseRun) {
    let m = &r.ffs.model;
    out.push(format!("## Response {}", r.response.name()));
    out.push(format!("rows used: {}  excluded: {}", r.n_rows, r.excluded.len()));
    for e in &r.excluded {
        out.push(format!("  excluded {}: {}", e.station, e.reason));
    }

    if r.verdicts.runs == 0 {
        out.push("pre-selection: disabled (all predictors confirmed)".to_string());
    } else {
        out.push(format!(
            "pre-selection: {} runs; confirmed [{}]; tentative [{}]; rejected [{}]",
            r.verdicts.runs,
            r.verdicts.with_verdict(Verdict::Confirmed).join(", "),
            r.verdicts.with_verdict(Verdict::Tentative).join(", "),
            r.verdicts.with_verdict(Verdict::Rejected).join(", "),
        ));
    }
    out.push(format!(
        "decorrelation: th = {:.2}, max VIF = {:.3}, retained [{}]",
        r.decorrelation.threshold,
        r.decorrelation.max_vif,
        r.decorrelation.retained.join(", ")
    ));

    match &r.sizing.variogram {
        Some(v) => out.push(format!(
            "variogram: {:?}, nugget {:.4}, sill {:.4}, range {:.1}",
            v.model, v.nugget, v.sill, v.range
        )),
        None => out.push("variogram: skipped (block size configured)".to_string()),
    }
    let sizes: Vec<String> = r.folds.fold_sizes().iter().map(usize::to_string).collect();
    out.push(format!(
        "spatial CV: block size {:.1}, {} blocks, fold sizes [{}]",
        r.sizing.block_size,
        r.folds.n_blocks(),
        sizes.join(", ")
    ));

    out.push(format!("selected predictors: {}", m.predictors.join(", ")));
    out.push(format!(
        "model: random forest, {} trees, mtry {}, CV {} {:.4} ({} subsets evaluated)",
        m.forest.n_trees(),
        m.mtry,
        m.metric.name(),
        m.score,
        r.ffs.evaluations
    ));
    if let Some(imp) = m.forest.importance() {
        for (name, v) in m.predictors.iter().zip(&imp.raw) {
            out.push(format!("  importance {name}: {v:.4}"));
        }
    }
    out.push(format!(
        "out-of-fold: n = {}, MSE {:.4}, RMSE {:.4}, R² {:.4}",
        m.stats.n, m.stats.mse, m.stats.rmse, m.stats.r_squared
    ));
    out.push(format!(
        "AOA: threshold {:.4}, {:.2}% of pixels inside",
        r.aoa.threshold, r.aoa.percent_inside
    ));
}

/// Plain-text summary of one channel.
pub fn render_run_log(run: &ChannelRun, date: &str, n_samples: usize) -> String {
    let mut out = vec![
        format!("# sedmap run log: {}", run.channel.name()),
        format!("date: {date}"),
        format!("samples: {n_samples}"),
        String::new(),
    ];
    for r in &run.responses {
        response_section(&mut out, r);
        out.push(String::new());
    }
    let names: Vec<&str> = run.grids.named().iter().map(|(n, _)| *n).collect();
    out.push(format!("outputs: {} (cells with data: {})", names.join(", "), run.grids.mud.valid_count()));
    out.join("\n") + "\n"
}
