//! Response channels and the log-ratio responses they model.
use serde::{Deserialize, Serialize};

use crate::compositional::{alr_forward, alr_mud_forward, Fractions};
use crate::error::Result;
use crate::samples::Sample;

/// A mapping run producing one set of fraction grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Mud, sand and gravel from the joint (alrM, alrG) models.
    MudSandGravel,
    /// Mud only, from ln(mud / (sand + gravel)).
    MudOnly,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Self::MudSandGravel => "mud-sand-gravel",
            Self::MudOnly => "mud-only",
        }
    }

    pub fn responses(self) -> &'static [Response] {
        match self {
            Self::MudSandGravel => &[Response::AlrMud, Response::AlrGravel],
            Self::MudOnly => &[Response::AlrMudOnly],
        }
    }
}

/// One modelled log-ratio coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Response {
    /// ln(mud / sand)
    AlrMud,
    /// ln(gravel / sand)
    AlrGravel,
    /// ln(mud / (sand + gravel))
    AlrMudOnly,
}

impl Response {
    pub fn name(self) -> &'static str {
        match self {
            Self::AlrMud => "alrM",
            Self::AlrGravel => "alrG",
            Self::AlrMudOnly => "alrM_mud",
        }
    }

    pub fn transform(self, f: &Fractions) -> Result<f64> {
        match self {
            Self::AlrMud => alr_forward(f).map(|a| a.alr_m),
            Self::AlrGravel => alr_forward(f).map(|a| a.alr_g),
            Self::AlrMudOnly => alr_mud_forward(f),
        }
    }

    /// Response value for every sample, applying the zero-numerator
    /// replacement first when configured. The first failure aborts.
    pub fn values(self, samples: &[Sample], zero_replacement: Option<f64>) -> Result<Vec<f64>> {
        samples
            .iter()
            .map(|s| {
                let f = match zero_replacement {
                    Some(delta) => s.fractions.with_zero_numerators_replaced(delta),
                    None => s.fractions,
                };
                self.transform(&f)
            })
            .collect()
    }
}
