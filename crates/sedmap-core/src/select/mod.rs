//! Predictor selection: Boruta pre-selection, VIF decorrelation and forward
//! feature selection.
pub mod boruta;
pub mod decorrelate;
pub mod ffs;

pub use boruta::{preselect, Verdict, VerdictSet};
pub use decorrelate::{decorrelate, DecorrelationResult};
pub use ffs::{forward_select, CandidateModel, FfsReport};
