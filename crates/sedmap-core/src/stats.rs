//! Small numeric helpers: moments, Pearson r, type-7 quantiles, OLS R²
//! and regression validation statistics.
use serde::{Deserialize, Serialize};

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Sample standard deviation (n − 1). NaN for fewer than two values.
pub fn std_dev(x: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
}

/// Pearson correlation; 0 when either series is constant.
pub fn pearson_r(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let num: f64 = x.iter().zip(y.iter()).map(|(&a, &b)| (a - mx) * (b - my)).sum();
    let vx = x.iter().map(|&a| (a - mx).powi(2)).sum::<f64>().sqrt();
    let vy = y.iter().map(|&b| (b - my).powi(2)).sum::<f64>().sqrt();
    if vx < 1e-12 || vy < 1e-12 {
        return 0.0;
    }
    (num / (vx * vy)).clamp(-1.0, 1.0)
}

/// Quantile with linear interpolation between order statistics (R type 7).
/// `sorted` must be ascending and non-empty.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Solve `a · x = b` in place by Gaussian elimination with partial pivoting.
/// Returns None for (numerically) singular systems.
pub fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a.iter().flatten().fold(0f64, |m, v| m.max(v.abs())).max(1.0);
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 * scale {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0f64; n];
    for row in (0..n).rev() {
        let s: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - s) / a[row][row];
    }
    Some(x)
}

/// R² of the OLS fit `y ~ 1 + xs`, via the normal equations on centred data.
///
/// Returns `Some(0.0)` with no regressors or a constant `y`, and `None` when
/// the regressors are collinear (the fit is then exact in the collinear
/// direction and VIF is unbounded).
pub fn ols_r_squared(y: &[f64], xs: &[&[f64]]) -> Option<f64> {
    let n = y.len();
    let p = xs.len();
    if p == 0 {
        return Some(0.0);
    }
    let my = mean(y);
    let ss_tot: f64 = y.iter().map(|v| (v - my).powi(2)).sum();
    if ss_tot < 1e-12 {
        return Some(0.0);
    }
    let means: Vec<f64> = xs.iter().map(|x| mean(x)).collect();

    // X'X and X'y on centred columns
    let mut xtx = vec![vec![0f64; p]; p];
    let mut xty = vec![0f64; p];
    for i in 0..n {
        for a in 0..p {
            let xa = xs[a][i] - means[a];
            xty[a] += xa * (y[i] - my);
            for b in a..p {
                xtx[a][b] += xa * (xs[b][i] - means[b]);
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            xtx[a][b] = xtx[b][a];
        }
    }

    let beta = solve_linear(xtx, xty)?;
    let ss_res: f64 = (0..n)
        .map(|i| {
            let fit: f64 = (0..p).map(|a| beta[a] * (xs[a][i] - means[a])).sum();
            (y[i] - my - fit).powi(2)
        })
        .sum();
    Some((1.0 - ss_res / ss_tot).clamp(0.0, 1.0))
}

/// Out-of-sample regression statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub n: usize,
    pub mse: f64,
    pub rmse: f64,
    /// 1 − SS_res / SS_tot. NaN when the observations are constant.
    pub r_squared: f64,
}

impl ValidationStats {
    pub fn from_predictions(observed: &[f64], predicted: &[f64]) -> Self {
        let n = observed.len();
        let mse = observed
            .iter()
            .zip(predicted.iter())
            .map(|(o, p)| (o - p).powi(2))
            .sum::<f64>()
            / n as f64;
        let m = mean(observed);
        let ss_tot: f64 = observed.iter().map(|o| (o - m).powi(2)).sum();
        let r_squared = if ss_tot < 1e-12 { f64::NAN } else { 1.0 - mse * n as f64 / ss_tot };
        Self { n, mse, rmse: mse.sqrt(), r_squared }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quantiles_match_type_seven() {
        let v = [1.0, 2.0, 3.0, 4.0, 10.0];
        assert_abs_diff_eq!(quantile_sorted(&v, 0.5), 3.0);
        assert_abs_diff_eq!(quantile_sorted(&v, 0.25), 2.0);
        assert_abs_diff_eq!(quantile_sorted(&v, 0.75), 4.0);
        assert_abs_diff_eq!(quantile_sorted(&[1.0, 2.0], 0.5), 1.5);
        assert_abs_diff_eq!(quantile_sorted(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn pearson_perfect_and_constant() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert_abs_diff_eq!(pearson_r(&x, &y), 1.0, epsilon = 1e-12);
        assert_eq!(pearson_r(&x, &[5.0; 4]), 0.0);
    }

    #[test]
    fn ols_recovers_exact_linear_fit() {
        let x1 = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x2 = [0.5, -1.0, 2.0, 0.0, 1.5, -0.5];
        let y: Vec<f64> = x1.iter().zip(x2.iter()).map(|(a, b)| 2.0 * a - 3.0 * b + 1.0).collect();
        let r2 = ols_r_squared(&y, &[&x1, &x2]).unwrap();
        assert_abs_diff_eq!(r2, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn ols_flags_collinear_regressors() {
        let x1 = [1.0, 2.0, 3.0, 4.0];
        let x2 = [2.0, 4.0, 6.0, 8.0];
        let y = [1.0, 3.0, 2.0, 5.0];
        assert!(ols_r_squared(&y, &[&x1, &x2]).is_none());
    }

    #[test]
    fn validation_stats_perfect_prediction() {
        let obs = [1.0, 2.0, 3.0];
        let s = ValidationStats::from_predictions(&obs, &obs);
        assert_eq!(s.mse, 0.0);
        assert_abs_diff_eq!(s.r_squared, 1.0);
        let s = ValidationStats::from_predictions(&obs, &[2.0, 2.0, 2.0]);
        assert_abs_diff_eq!(s.r_squared, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.rmse, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }
}
