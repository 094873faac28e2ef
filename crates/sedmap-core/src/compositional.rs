//! Additive log-ratio (ALR) transform for mud/sand/gravel compositions.
//!
//! Sand is the reference component:
//!   alrM = ln(mud / sand),  alrG = ln(gravel / sand)
//! Inverse:
//!   mud = e^alrM / (e^alrM + e^alrG + 1), gravel = e^alrG / (…), sand = 1 − mud − gravel
//!
//! The mud-only variant uses sand + gravel as the reference:
//!   alrM = ln(mud / (sand + gravel)),  mud = e^alrM / (e^alrM + 1)
//!
//! A non-positive reference or numerator is an error, never ±∞ or NaN.
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Fractions in percent (0–100), as recorded for a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractions {
    pub mud: f64,
    pub sand: f64,
    pub gravel: f64,
}

/// Fractions as proportions (0–1), as produced by the back-transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Composition {
    pub mud: f64,
    pub sand: f64,
    pub gravel: f64,
}

/// ALR coordinates with sand as reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Alr {
    pub alr_m: f64,
    pub alr_g: f64,
}

impl Fractions {
    pub fn new(mud: f64, sand: f64, gravel: f64) -> Self {
        Self { mud, sand, gravel }
    }

    pub fn sum(&self) -> f64 {
        self.mud + self.sand + self.gravel
    }

    /// Check non-negativity and that the sum is 100 within `tolerance`.
    pub fn validate(&self, station: &str, tolerance: f64) -> Result<()> {
        let sum = self.sum();
        let finite = self.mud.is_finite() && self.sand.is_finite() && self.gravel.is_finite();
        if !finite || self.mud < 0.0 || self.sand < 0.0 || self.gravel < 0.0 || (sum - 100.0).abs() > tolerance {
            return Err(PipelineError::InvalidFractions {
                station: station.to_string(),
                sum,
                tolerance,
            });
        }
        Ok(())
    }

    /// Replace zero mud/gravel by `delta` percent. Sand is left untouched so a
    /// zero reference still fails the transform.
    pub fn with_zero_numerators_replaced(&self, delta: f64) -> Self {
        let bump = |v: f64| if v <= 0.0 { delta } else { v };
        Self { mud: bump(self.mud), sand: self.sand, gravel: bump(self.gravel) }
    }
}

fn positive(component: &'static str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(PipelineError::NonPositiveComponent { component, value })
    }
}

/// Fractions → (alrM, alrG).
pub fn alr_forward(f: &Fractions) -> Result<Alr> {
    let sand = positive("sand", f.sand)?;
    let mud = positive("mud", f.mud)?;
    let gravel = positive("gravel", f.gravel)?;
    Ok(Alr {
        alr_m: (mud / sand).ln(),
        alr_g: (gravel / sand).ln(),
    })
}

/// (alrM, alrG) → proportions summing to 1.
pub fn alr_inverse(a: Alr) -> Composition {
    // shift by the largest exponent (the reference contributes e^0)
    let shift = a.alr_m.max(a.alr_g).max(0.0);
    let em = (a.alr_m - shift).exp();
    let eg = (a.alr_g - shift).exp();
    let denom = em + eg + (-shift).exp();
    let mud = em / denom;
    let gravel = eg / denom;
    Composition { mud, sand: 1.0 - mud - gravel, gravel }
}

/// Fractions → ln(mud / (sand + gravel)).
pub fn alr_mud_forward(f: &Fractions) -> Result<f64> {
    let reference = positive("sand+gravel", f.sand + f.gravel)?;
    let mud = positive("mud", f.mud)?;
    Ok((mud / reference).ln())
}

/// ln(mud / (sand + gravel)) → mud proportion.
pub fn alr_mud_inverse(alr_m: f64) -> f64 {
    // logistic; written to stay finite for large |alr_m|
    if alr_m >= 0.0 {
        1.0 / (1.0 + (-alr_m).exp())
    } else {
        let e = alr_m.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn round_trip_recovers_proportions() {
        let cases = [
            (10.0, 60.0, 30.0),
            (0.5, 99.0, 0.5),
            (45.0, 10.0, 45.0),
            (1.0, 1.0, 98.0),
            (33.3, 33.4, 33.3),
        ];
        for &(g, s, m) in &cases {
            let f = Fractions::new(m, s, g);
            let c = alr_inverse(alr_forward(&f).unwrap());
            assert_abs_diff_eq!(c.gravel, g / 100.0, epsilon = 1e-9);
            assert_abs_diff_eq!(c.sand, s / 100.0, epsilon = 1e-9);
            assert_abs_diff_eq!(c.mud, m / 100.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn zero_sand_is_a_defined_error() {
        let f = Fractions::new(50.0, 0.0, 50.0);
        match alr_forward(&f) {
            Err(PipelineError::NonPositiveComponent { component, .. }) => assert_eq!(component, "sand"),
            other => panic!("expected NonPositiveComponent, got {other:?}"),
        }
    }

    #[test]
    fn zero_numerator_errors_unless_replaced() {
        let f = Fractions::new(0.0, 80.0, 20.0);
        assert!(alr_forward(&f).is_err());
        let r = f.with_zero_numerators_replaced(0.1);
        let a = alr_forward(&r).unwrap();
        assert!(a.alr_m.is_finite() && a.alr_g.is_finite());
        // sand is never bumped
        let z = Fractions::new(50.0, 0.0, 50.0).with_zero_numerators_replaced(0.1);
        assert!(alr_forward(&z).is_err());
    }

    #[test]
    fn mud_only_round_trip() {
        let f = Fractions::new(25.0, 50.0, 25.0);
        let a = alr_mud_forward(&f).unwrap();
        assert_abs_diff_eq!(alr_mud_inverse(a), 0.25, epsilon = 1e-12);
        assert!(alr_mud_forward(&Fractions::new(100.0, 0.0, 0.0)).is_err());
    }

    #[test]
    fn inverse_sums_to_one_for_extreme_inputs() {
        for &(m, g) in &[(-30.0, 25.0), (12.0, -12.0), (0.0, 0.0), (5.5, 5.5), (800.0, -3.0)] {
            let c = alr_inverse(Alr { alr_m: m, alr_g: g });
            assert_abs_diff_eq!(c.mud + c.sand + c.gravel, 1.0, epsilon = 1e-12);
        }
        assert!(alr_mud_inverse(800.0).is_finite());
        assert!(alr_mud_inverse(-800.0) >= 0.0);
    }

    #[test]
    fn validate_rejects_bad_sums_and_negatives() {
        assert!(Fractions::new(30.0, 30.0, 40.0).validate("a", 1.0).is_ok());
        assert!(Fractions::new(30.0, 30.0, 39.5).validate("a", 1.0).is_ok());
        assert!(Fractions::new(30.0, 30.0, 30.0).validate("a", 1.0).is_err());
        assert!(Fractions::new(-1.0, 51.0, 50.0).validate("a", 1.0).is_err());
        assert!(Fractions::new(f64::NAN, 50.0, 50.0).validate("a", 1.0).is_err());
    }
}
