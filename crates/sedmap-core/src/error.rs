//! Pipeline error taxonomy.
//!
//! Every fallible stage returns [`Result`]. Errors are grouped by
//! [`ErrorKind`] so callers can tell unusable input apart from a statistically
//! ill-posed channel or a failed worker.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input data is unusable; nothing may be fitted.
    InputValidation,
    /// The statistics of this channel cannot be estimated.
    IllPosed,
    /// A parallel evaluation failed; the whole search is void.
    Worker,
    /// Bad configuration or an environment/IO failure.
    Config,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("station {station}: fractions sum to {sum:.3}, expected 100 ± {tolerance}")]
    InvalidFractions { station: String, sum: f64, tolerance: f64 },

    #[error("log-ratio undefined: {component} is {value} (must be > 0)")]
    NonPositiveComponent { component: &'static str, value: f64 },

    #[error("layer '{layer}' is not co-registered with the predictor stack")]
    NotCoRegistered { layer: String },

    #[error("sample {station} is in CRS {found}, expected {expected}")]
    MixedCrs { station: String, expected: String, found: String },

    #[error("predictor '{0}' is not in the stack")]
    MissingPredictor(String),

    #[error("regression matrix is empty: all {excluded} samples were excluded")]
    EmptyRegressionMatrix { excluded: usize },

    #[error("variogram fit failed: {0}")]
    VariogramFit(String),

    #[error("VIF search exhausted at th = 0 with max VIF {max_vif:.3} over {retained} predictors")]
    VifSearchExhausted { max_vif: f64, retained: usize },

    #[error("only {occupied} occupied spatial blocks for {folds} folds")]
    InsufficientBlocks { occupied: usize, folds: usize },

    #[error("{context}: need at least {needed} samples, found {found}")]
    InsufficientSamples { context: &'static str, needed: usize, found: usize },

    #[error("forward feature selection needs at least one candidate predictor")]
    InsufficientPredictors,

    #[error("{0}")]
    IllPosed(String),

    #[error("evaluation of subset [{subset}] failed: {source}")]
    Evaluation {
        subset: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFractions { .. }
            | Self::NonPositiveComponent { .. }
            | Self::NotCoRegistered { .. }
            | Self::MixedCrs { .. }
            | Self::MissingPredictor(_)
            | Self::EmptyRegressionMatrix { .. } => ErrorKind::InputValidation,
            Self::VariogramFit(_)
            | Self::VifSearchExhausted { .. }
            | Self::InsufficientBlocks { .. }
            | Self::InsufficientSamples { .. }
            | Self::InsufficientPredictors
            | Self::IllPosed(_) => ErrorKind::IllPosed,
            Self::Evaluation { .. } => ErrorKind::Worker,
            Self::Config(_) | Self::ThreadPool(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let e = PipelineError::NonPositiveComponent { component: "sand", value: 0.0 };
        assert_eq!(e.kind(), ErrorKind::InputValidation);

        let e = PipelineError::VifSearchExhausted { max_vif: 3.0, retained: 2 };
        assert_eq!(e.kind(), ErrorKind::IllPosed);

        let e = PipelineError::Evaluation {
            subset: "a, b".into(),
            source: Box::new(PipelineError::IllPosed("x".into())),
        };
        assert_eq!(e.kind(), ErrorKind::Worker);
        assert!(e.to_string().contains("a, b"));
    }
}
