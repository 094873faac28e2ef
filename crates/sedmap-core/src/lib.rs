//! Seafloor sediment composition mapping.
//!
//! Point samples of mud, sand and gravel are transformed to additive
//! log-ratios, modelled with random forests over a predictor raster stack
//! (predictor pre-selection, VIF decorrelation and forward feature selection
//! under spatially blocked cross-validation), limited to their area of
//! applicability and back-transformed to fraction grids.

pub mod aoa;
pub mod assemble;
pub mod compositional;
pub mod config;
pub mod coords;
pub mod error;
pub mod forest;
pub mod grid;
pub mod matrix;
pub mod parallel;
pub mod pipeline;
pub mod regression;
pub mod report;
pub mod response;
pub mod samples;
pub mod select;
pub mod spatial;
pub mod stack;
pub mod stats;

pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError, Result};
pub use pipeline::{run_channel, run_pipeline, RunArtifacts};
pub use response::{Channel, Response};
