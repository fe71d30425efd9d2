//! Mathematical utility functions shared by the statistical tests.
//!
//! Moments, autocorrelation functions, distribution tails and the small
//! interpolation helpers used by tabulated p-values.

use crate::errors::{EcmAnalysisError, EcmResult};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal};

/// Numerical tolerances
pub mod constants {
    /// Variance below which a series is treated as constant
    pub const MIN_VARIANCE: f64 = 1e-14;
    /// Relative tolerance used for rank and singularity decisions
    pub const SINGULAR_TOL: f64 = 1e-10;
}

/// Safe comparison for floating point values (NaN sorts last)
pub fn float_total_cmp(a: &f64, b: &f64) -> std::cmp::Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
    }
}

/// Arithmetic mean; NaN for empty input
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Unbiased sample variance using Welford's single-pass algorithm.
///
/// Returns 0.0 for fewer than two points.
pub fn calculate_variance(data: &[f64]) -> f64 {
    if data.len() <= 1 {
        return 0.0;
    }

    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, &value) in data.iter().enumerate() {
        let count = (i + 1) as f64;
        let delta = value - mean;
        mean += delta / count;
        m2 += delta * (value - mean);
    }

    (m2 / (data.len() - 1) as f64).max(0.0)
}

/// Population skewness (third standardized moment)
pub fn calculate_skewness(data: &[f64]) -> f64 {
    let n = data.len() as f64;
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev < 1e-10 {
        return 0.0;
    }

    data.iter().map(|x| ((x - m) / std_dev).powi(3)).sum::<f64>() / n
}

/// Population kurtosis (fourth standardized moment, 3.0 for a normal)
pub fn calculate_kurtosis(data: &[f64]) -> f64 {
    let n = data.len() as f64;
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev < 1e-10 {
        return 3.0;
    }

    data.iter().map(|x| ((x - m) / std_dev).powi(4)).sum::<f64>() / n
}

/// Sample autocorrelations for lags `0..=max_lag`.
///
/// Uses the biased autocovariance (denominator `n` at every lag), which keeps
/// the implied Toeplitz matrix positive semi-definite for the PACF recursion.
/// A constant series yields `1.0` at lag 0 and zeros elsewhere.
///
/// ```rust
/// use market_ecm::math_utils::calculate_autocorrelations;
///
/// let acf = calculate_autocorrelations(&[1.0, 2.0, 1.5, 2.5, 1.2, 2.1], 3);
/// assert_eq!(acf.len(), 4);
/// assert_eq!(acf[0], 1.0);
/// ```
pub fn calculate_autocorrelations(data: &[f64], max_lag: usize) -> Vec<f64> {
    let n = data.len();
    let mut autocorrs = vec![0.0; max_lag + 1];
    autocorrs[0] = 1.0;
    if n == 0 {
        return autocorrs;
    }

    let m = mean(data);
    let gamma0 = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n as f64;
    if gamma0 <= constants::MIN_VARIANCE {
        return autocorrs;
    }

    for lag in 1..=max_lag.min(n.saturating_sub(1)) {
        let mut covariance = 0.0;
        for i in 0..(n - lag) {
            covariance += (data[i] - m) * (data[i + lag] - m);
        }
        autocorrs[lag] = covariance / n as f64 / gamma0;
    }

    autocorrs
}

/// Partial autocorrelations for lags `0..=max_lag` via the Durbin-Levinson recursion
/// on the sample autocorrelations (Yule-Walker estimates).
pub fn calculate_partial_autocorrelations(data: &[f64], max_lag: usize) -> EcmResult<Vec<f64>> {
    let acf = calculate_autocorrelations(data, max_lag);
    let mut pacf = vec![0.0; max_lag + 1];
    pacf[0] = 1.0;
    if max_lag == 0 {
        return Ok(pacf);
    }

    let mut phi_prev: Vec<f64> = Vec::with_capacity(max_lag);
    let mut innovation_var: f64 = 1.0;

    for k in 1..=max_lag {
        let num = acf[k]
            - phi_prev
                .iter()
                .enumerate()
                .map(|(j, phi)| phi * acf[k - 1 - j])
                .sum::<f64>();
        if innovation_var.abs() < constants::SINGULAR_TOL {
            return Err(EcmAnalysisError::numerical(
                format!("innovation variance vanished at lag {}", k),
                "partial_autocorrelation",
            ));
        }
        let phi_kk = num / innovation_var;

        let mut phi_next = Vec::with_capacity(k);
        for j in 0..k - 1 {
            phi_next.push(phi_prev[j] - phi_kk * phi_prev[k - 2 - j]);
        }
        phi_next.push(phi_kk);

        innovation_var *= 1.0 - phi_kk * phi_kk;
        pacf[k] = phi_kk;
        phi_prev = phi_next;
    }

    Ok(pacf)
}

/// Upper tail probability of a chi-squared statistic
pub fn chi_squared_sf(statistic: f64, df: f64) -> EcmResult<f64> {
    if !statistic.is_finite() {
        return Err(EcmAnalysisError::numerical(
            format!("non-finite chi-squared statistic {}", statistic),
            "chi_squared_sf",
        ));
    }
    let dist = ChiSquared::new(df).map_err(|_| {
        EcmAnalysisError::numerical(
            format!("invalid chi-squared degrees of freedom {}", df),
            "chi_squared_sf",
        )
    })?;
    Ok((1.0 - dist.cdf(statistic.max(0.0))).clamp(0.0, 1.0))
}

/// Upper tail probability of an F statistic
pub fn f_sf(statistic: f64, df_num: f64, df_den: f64) -> EcmResult<f64> {
    if !statistic.is_finite() {
        return Err(EcmAnalysisError::numerical(
            format!("non-finite F statistic {}", statistic),
            "f_sf",
        ));
    }
    let dist = FisherSnedecor::new(df_num, df_den).map_err(|_| {
        EcmAnalysisError::numerical(
            format!("invalid F degrees of freedom ({}, {})", df_num, df_den),
            "f_sf",
        )
    })?;
    Ok((1.0 - dist.cdf(statistic.max(0.0))).clamp(0.0, 1.0))
}

/// Standard normal CDF
pub fn standard_normal_cdf(x: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(x),
        Err(_) => f64::NAN,
    }
}

/// Piecewise-linear interpolation of `x` over increasing `xs`, clamped at the ends.
pub fn interpolate_clamped(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    if xs.is_empty() {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return ys[last];
    }
    for i in 1..xs.len() {
        if x <= xs[i] {
            let (x1, x2) = (xs[i - 1], xs[i]);
            let (y1, y2) = (ys[i - 1], ys[i]);
            if (x2 - x1).abs() < 1e-12 {
                return y1;
            }
            return y1 + (y2 - y1) * (x - x1) / (x2 - x1);
        }
    }
    ys[last]
}

/// Turn a computed value into `Some` only when it is finite
pub fn finite_or_none(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_variance_and_moments() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_approx_eq!(calculate_variance(&data), 2.5, 1e-12);
        assert_approx_eq!(calculate_skewness(&data), 0.0, 1e-12);
        // Uniform-like spacing is platykurtic
        assert!(calculate_kurtosis(&data) < 3.0);
        assert_eq!(calculate_variance(&[1.0]), 0.0);
        assert_eq!(calculate_kurtosis(&[2.0, 2.0, 2.0]), 3.0);
    }

    #[test]
    fn test_autocorrelation_of_alternating_series() {
        let data: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let acf = calculate_autocorrelations(&data, 2);
        assert_approx_eq!(acf[0], 1.0, 1e-12);
        assert_approx_eq!(acf[1], -39.0 / 40.0, 1e-12);
        assert_approx_eq!(acf[2], 38.0 / 40.0, 1e-12);
    }

    #[test]
    fn test_autocorrelation_constant_and_short() {
        let acf = calculate_autocorrelations(&[3.0; 10], 4);
        assert_eq!(acf, vec![1.0, 0.0, 0.0, 0.0, 0.0]);

        let acf = calculate_autocorrelations(&[1.0, 2.0], 5);
        assert_eq!(acf.len(), 6);
        assert!(acf[2..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_pacf_first_lag_equals_acf() {
        let data: Vec<f64> = (0..60).map(|i| ((i as f64) * 0.7).sin() + 0.1 * i as f64).collect();
        let acf = calculate_autocorrelations(&data, 5);
        let pacf = calculate_partial_autocorrelations(&data, 5).unwrap();
        assert_approx_eq!(pacf[1], acf[1], 1e-12);
        assert!(pacf.iter().all(|v| v.abs() <= 1.0 + 1e-9));
    }

    #[test]
    fn test_pacf_of_ar1_cuts_off() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut x = vec![0.0; 400];
        for t in 1..400 {
            x[t] = 0.6 * x[t - 1] + normal.sample(&mut rng);
        }
        let pacf = calculate_partial_autocorrelations(&x, 4).unwrap();
        assert!(pacf[1] > 0.4);
        assert!(pacf[2].abs() < 0.2);
        assert!(pacf[3].abs() < 0.2);
    }

    #[test]
    fn test_tail_probabilities() {
        assert_approx_eq!(chi_squared_sf(5.991, 2.0).unwrap(), 0.05, 1e-3);
        assert_approx_eq!(f_sf(0.0, 2.0, 10.0).unwrap(), 1.0, 1e-12);
        assert!(chi_squared_sf(f64::NAN, 2.0).is_err());
        assert_approx_eq!(standard_normal_cdf(0.0), 0.5, 1e-12);
    }

    #[test]
    fn test_interpolate_clamped() {
        let xs = [0.347, 0.463, 0.574, 0.739];
        let ys = [0.10, 0.05, 0.025, 0.01];
        assert_eq!(interpolate_clamped(0.1, &xs, &ys), 0.10);
        assert_eq!(interpolate_clamped(2.0, &xs, &ys), 0.01);
        assert_approx_eq!(interpolate_clamped(0.405, &xs, &ys), 0.075, 1e-12);
    }
}
