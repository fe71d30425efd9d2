//! Unit-root and stationarity testing with a transformation ladder.
//!
//! Each variable is tried as `original`, `diff`, `log` and `log_diff` (the log
//! forms only for strictly positive series). A candidate is accepted when the
//! Augmented Dickey-Fuller test rejects a unit root and the KPSS test does not
//! reject stationarity. The first accepted candidate wins; if none is accepted
//! the untransformed series is kept as an explicit fallback.

use crate::config::PipelineConfig;
use crate::errors::{EcmAnalysisError, EcmResult};
use crate::linear_algebra::{bartlett_long_run_variance, ols_fit, OlsFit};
use crate::math_utils::{finite_or_none, interpolate_clamped, mean, standard_normal_cdf};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// TRANSFORMATIONS
// ============================================================================

/// Candidate transformations in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transformation {
    /// Series as given
    Original,
    /// First difference `x[t] - x[t-1]`
    Diff,
    /// Natural logarithm
    Log,
    /// First difference of the natural logarithm
    LogDiff,
}

impl Transformation {
    /// Ladder order
    pub const PRIORITY: [Transformation; 4] = [
        Transformation::Original,
        Transformation::Diff,
        Transformation::Log,
        Transformation::LogDiff,
    ];

    /// Whether the transformation drops the first observation
    pub fn drops_first(self) -> bool {
        matches!(self, Transformation::Diff | Transformation::LogDiff)
    }

    /// Apply to raw values.
    ///
    /// ```rust
    /// use market_ecm::stationarity::Transformation;
    ///
    /// assert_eq!(Transformation::Diff.apply(&[1.0, 3.0, 6.0]), vec![2.0, 3.0]);
    /// ```
    pub fn apply(self, values: &[f64]) -> Vec<f64> {
        fn diff(v: &[f64]) -> Vec<f64> {
            v.windows(2).map(|w| w[1] - w[0]).collect()
        }
        match self {
            Transformation::Original => values.to_vec(),
            Transformation::Diff => diff(values),
            Transformation::Log => values.iter().map(|v| v.ln()).collect(),
            Transformation::LogDiff => {
                let logs: Vec<f64> = values.iter().map(|v| v.ln()).collect();
                diff(&logs)
            }
        }
    }

    /// Stable name used in results
    pub fn as_str(self) -> &'static str {
        match self {
            Transformation::Original => "original",
            Transformation::Diff => "diff",
            Transformation::Log => "log",
            Transformation::LogDiff => "log_diff",
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transformations applicable to `values`, in priority order.
///
/// Four candidates for a strictly positive series of at least two points,
/// otherwise `original` and `diff` only.
pub fn candidate_transformations(values: &[f64]) -> Vec<Transformation> {
    let positive = values.len() >= 2 && values.iter().all(|&v| v > 0.0);
    Transformation::PRIORITY
        .iter()
        .copied()
        .filter(|t| positive || matches!(t, Transformation::Original | Transformation::Diff))
        .collect()
}

// ============================================================================
// AUGMENTED DICKEY-FULLER
// ============================================================================

/// Deterministic terms of the ADF regression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdfRegression {
    /// Constant only
    Constant,
    /// No deterministic terms (used on cointegrating residuals)
    NoConstant,
}

impl AdfRegression {
    fn n_trend(self) -> usize {
        match self {
            AdfRegression::Constant => 1,
            AdfRegression::NoConstant => 0,
        }
    }
}

/// Critical values at the conventional levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalValues {
    #[serde(rename = "1%")]
    pub one_pct: f64,
    #[serde(rename = "5%")]
    pub five_pct: f64,
    #[serde(rename = "10%")]
    pub ten_pct: f64,
}

/// MacKinnon (2010) response surface `b0 + b1/n + b2/n² + b3/n³`.
fn response_surface(coefs: &[[f64; 4]; 3], nobs: usize) -> CriticalValues {
    let eval = |c: &[f64; 4]| {
        let inv = 1.0 / nobs as f64;
        c[0] + c[1] * inv + c[2] * inv * inv + c[3] * inv * inv * inv
    };
    CriticalValues {
        one_pct: eval(&coefs[0]),
        five_pct: eval(&coefs[1]),
        ten_pct: eval(&coefs[2]),
    }
}

/// Critical values for `n_vars` integrated series with a constant.
pub fn mackinnon_critical_values(n_vars: usize, nobs: usize) -> EcmResult<CriticalValues> {
    const TAU_C_1: [[f64; 4]; 3] = [
        [-3.43035, -6.5393, -16.786, -79.433],
        [-2.86154, -2.8903, -4.234, -40.040],
        [-2.56677, -1.5384, -2.809, 0.0],
    ];
    const TAU_C_2: [[f64; 4]; 3] = [
        [-3.89644, -10.9519, -22.527, 0.0],
        [-3.33613, -6.1101, -6.823, 0.0],
        [-3.04445, -4.2412, -2.720, 0.0],
    ];
    match n_vars {
        1 => Ok(response_surface(&TAU_C_1, nobs)),
        2 => Ok(response_surface(&TAU_C_2, nobs)),
        _ => Err(EcmAnalysisError::InvalidParameter {
            parameter: "n_vars".to_string(),
            value: n_vars as f64,
            constraint: "1 or 2".to_string(),
        }),
    }
}

/// MacKinnon (1994) approximate asymptotic p-value, constant case.
///
/// `n_vars` is 1 for a unit-root test and 2 for an Engle-Granger test.
pub fn mackinnon_p_value(statistic: f64, n_vars: usize) -> EcmResult<f64> {
    // (tau_max, tau_min, tau_star, small-p polynomial, large-p polynomial)
    let (tau_max, tau_min, tau_star, small, large): (f64, f64, f64, [f64; 3], [f64; 4]) =
        match n_vars {
            1 => (
                2.74,
                -18.83,
                -1.61,
                [2.1659, 1.4412, 0.038269],
                [1.7339, 0.93202, -0.12745, -0.010368],
            ),
            2 => (
                0.92,
                -18.86,
                -2.62,
                [2.92, 1.5012, 0.039796],
                [2.1945, 0.64695, -0.29198, -0.042377],
            ),
            _ => {
                return Err(EcmAnalysisError::InvalidParameter {
                    parameter: "n_vars".to_string(),
                    value: n_vars as f64,
                    constraint: "1 or 2".to_string(),
                })
            }
        };

    if statistic.is_nan() {
        return Err(EcmAnalysisError::numerical("NaN test statistic", "mackinnon_p_value"));
    }
    if statistic > tau_max {
        return Ok(1.0);
    }
    if statistic < tau_min {
        return Ok(0.0);
    }
    let z = if statistic <= tau_star {
        small[0] + small[1] * statistic + small[2] * statistic.powi(2)
    } else {
        large[0] + large[1] * statistic + large[2] * statistic.powi(2) + large[3] * statistic.powi(3)
    };
    Ok(standard_normal_cdf(z))
}

/// Raw ADF regression outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfStatistic {
    /// t-statistic of the lagged level
    pub statistic: f64,
    /// Lagged differences kept after AIC selection
    pub used_lag: usize,
    /// Observations in the final regression
    pub n_obs: usize,
}

/// Result of a unit-root test with a constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfTest {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lag: usize,
    pub n_obs: usize,
    pub critical_values: CriticalValues,
}

/// Regression of `Δy_t` on `y_{t-1}`, `lags` lagged differences and the
/// deterministic terms, on the last `nobs` differences.
fn adf_regression(
    data: &[f64],
    diffs: &[f64],
    lags: usize,
    nobs: usize,
    regression: AdfRegression,
) -> EcmResult<OlsFit> {
    let start = diffs.len() - nobs;
    let mut columns = Vec::with_capacity(lags + 2);
    // y_{t-1} for Δy_t = diffs[t] is data[t]
    columns.push(data[start..start + nobs].to_vec());
    for j in 1..=lags {
        columns.push((start..diffs.len()).map(|t| diffs[t - j]).collect());
    }
    if regression == AdfRegression::Constant {
        columns.push(vec![1.0; nobs]);
    }
    ols_fit(&columns, &diffs[start..])
}

/// ADF t-statistic with automatic lag selection by AIC.
///
/// Lags `0..=max_lag` are compared on a common sample; the selected lag is then
/// re-estimated on the longest available sample. `max_lag` defaults to
/// `ceil(12·(n/100)^¼)` and is always bounded by `n/2 - ntrend - 1`.
pub fn adf_statistic(
    data: &[f64],
    regression: AdfRegression,
    max_lag: Option<usize>,
) -> EcmResult<AdfStatistic> {
    let n = data.len();
    let ntrend = regression.n_trend();
    let bound = (n / 2) as isize - ntrend as isize - 1;
    if n < 4 || bound < 0 {
        return Err(EcmAnalysisError::InsufficientData {
            required: 2 * (ntrend + 1) + 2,
            actual: n,
        });
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(EcmAnalysisError::numerical("non-finite input", "adf_statistic"));
    }

    let default_lag = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    let max_lag = max_lag.unwrap_or(default_lag).min(bound as usize);

    let diffs: Vec<f64> = data.windows(2).map(|w| w[1] - w[0]).collect();

    let common_nobs = diffs.len() - max_lag;
    let mut best: Option<(f64, usize)> = None;
    for lag in 0..=max_lag {
        match adf_regression(data, &diffs, lag, common_nobs, regression) {
            Ok(fit) => {
                let aic = fit.aic();
                if aic.is_nan() {
                    continue;
                }
                if best.map_or(true, |(best_aic, _)| aic < best_aic) {
                    best = Some((aic, lag));
                }
            }
            Err(e) => log::trace!("ADF lag {} skipped: {}", lag, e),
        }
    }

    let (_, used_lag) = best.ok_or_else(|| {
        EcmAnalysisError::numerical(
            "every lag configuration produced a singular regression",
            "adf_statistic",
        )
    })?;

    let nobs = diffs.len() - used_lag;
    let fit = adf_regression(data, &diffs, used_lag, nobs, regression)?;
    let statistic = fit.t_statistic(0);
    if !statistic.is_finite() {
        return Err(EcmAnalysisError::numerical(
            format!("degenerate ADF statistic {}", statistic),
            "adf_statistic",
        ));
    }

    Ok(AdfStatistic {
        statistic,
        used_lag,
        n_obs: nobs,
    })
}

/// Augmented Dickey-Fuller test with a constant, AIC lag selection and the
/// MacKinnon approximate p-value.
pub fn adf_test(data: &[f64]) -> EcmResult<AdfTest> {
    let raw = adf_statistic(data, AdfRegression::Constant, None)?;
    Ok(AdfTest {
        statistic: raw.statistic,
        p_value: mackinnon_p_value(raw.statistic, 1)?,
        used_lag: raw.used_lag,
        n_obs: raw.n_obs,
        critical_values: mackinnon_critical_values(1, raw.n_obs)?,
    })
}

// ============================================================================
// KPSS
// ============================================================================

/// Result of a level-stationarity KPSS test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KpssTest {
    pub statistic: f64,
    /// Interpolated p-value, within [0.01, 0.10]
    pub p_value: f64,
    /// Bartlett truncation lag
    pub lags: usize,
}

/// Hobijn, Franses and Ooms (1998) automatic bandwidth.
fn kpss_autolag(resids: &[f64]) -> EcmResult<usize> {
    let n = resids.len();
    let covlags = (n as f64).powf(2.0 / 9.0) as usize;
    let mut s0 = resids.iter().map(|r| r * r).sum::<f64>() / n as f64;
    let mut s1 = 0.0;
    for i in 1..=covlags.min(n - 1) {
        let prod: f64 = (i..n).map(|t| resids[t] * resids[t - i]).sum::<f64>() / (n as f64 / 2.0);
        s0 += prod;
        s1 += i as f64 * prod;
    }
    if s0 == 0.0 || !s0.is_finite() {
        return Err(EcmAnalysisError::numerical("zero residual variance", "kpss_autolag"));
    }
    let s_hat = s1 / s0;
    let gamma_hat = 1.1447 * (s_hat * s_hat).powf(1.0 / 3.0);
    Ok((gamma_hat * (n as f64).powf(1.0 / 3.0)) as usize)
}

/// KPSS test of level stationarity.
///
/// The p-value is interpolated in the Kwiatkowski et al. (1992) table and so
/// saturates at 0.01 and 0.10.
pub fn kpss_test(data: &[f64]) -> EcmResult<KpssTest> {
    const CRIT: [f64; 4] = [0.347, 0.463, 0.574, 0.739];
    const PVALS: [f64; 4] = [0.10, 0.05, 0.025, 0.01];

    let n = data.len();
    if n < 3 {
        return Err(EcmAnalysisError::InsufficientData {
            required: 3,
            actual: n,
        });
    }
    let m = mean(data);
    let resids: Vec<f64> = data.iter().map(|x| x - m).collect();

    let lags = kpss_autolag(&resids)?.min(n - 1);

    let mut cumsum = 0.0;
    let eta = resids
        .iter()
        .map(|r| {
            cumsum += r;
            cumsum * cumsum
        })
        .sum::<f64>()
        / (n * n) as f64;
    let s_hat = bartlett_long_run_variance(&resids, lags)?;
    if s_hat <= 0.0 {
        return Err(EcmAnalysisError::numerical(
            format!("non-positive long-run variance {}", s_hat),
            "kpss_test",
        ));
    }
    let statistic = eta / s_hat;
    if !statistic.is_finite() {
        return Err(EcmAnalysisError::numerical("non-finite KPSS statistic", "kpss_test"));
    }

    Ok(KpssTest {
        statistic,
        p_value: interpolate_clamped(statistic, &CRIT, &PVALS),
        lags,
    })
}

// ============================================================================
// TRANSFORMATION SEARCH
// ============================================================================

/// Test outcome of one candidate transformation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformationResult {
    pub transformation: Transformation,
    /// Transformed values (not serialized)
    #[serde(skip)]
    pub series: Vec<f64>,
    pub adf_statistic: Option<f64>,
    pub adf_p_value: Option<f64>,
    pub adf_used_lag: Option<usize>,
    pub kpss_statistic: Option<f64>,
    pub kpss_p_value: Option<f64>,
    pub kpss_lags: Option<usize>,
    pub stationary: bool,
}

/// Outcome of the ladder search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "transformation", rename_all = "snake_case")]
pub enum TransformationChoice {
    /// First candidate passing both tests
    Selected(Transformation),
    /// No candidate passed; the default was kept
    Fallback(Transformation),
}

impl TransformationChoice {
    /// The transformation in use either way
    pub fn transformation(self) -> Transformation {
        match self {
            TransformationChoice::Selected(t) | TransformationChoice::Fallback(t) => t,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, TransformationChoice::Fallback(_))
    }
}

/// Per-variable stationarity analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationarityResult {
    pub variable: String,
    pub choice: TransformationChoice,
    /// Selected transformed series, keyed by date
    #[serde(skip)]
    pub series: BTreeMap<NaiveDate, f64>,
    /// Every candidate that was evaluated, in ladder order
    pub candidates: Vec<TransformationResult>,
}

/// Runs the ADF/KPSS agreement rule over the transformation ladder.
pub struct StationarityAnalyzer {
    significance: f64,
}

impl StationarityAnalyzer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            significance: config.analysis.stationarity_significance_level,
        }
    }

    /// Test one transformed series; tests that cannot run leave their fields empty.
    pub fn evaluate(&self, transformation: Transformation, series: Vec<f64>) -> TransformationResult {
        let adf = adf_test(&series)
            .map_err(|e| log::debug!("ADF unavailable for {}: {}", transformation, e))
            .ok();
        let kpss = kpss_test(&series)
            .map_err(|e| log::debug!("KPSS unavailable for {}: {}", transformation, e))
            .ok();

        let stationary = match (&adf, &kpss) {
            (Some(adf), Some(kpss)) => {
                adf.p_value < self.significance && kpss.p_value > self.significance
            }
            _ => false,
        };

        TransformationResult {
            transformation,
            series,
            adf_statistic: adf.and_then(|a| finite_or_none(a.statistic)),
            adf_p_value: adf.and_then(|a| finite_or_none(a.p_value)),
            adf_used_lag: adf.map(|a| a.used_lag),
            kpss_statistic: kpss.and_then(|k| finite_or_none(k.statistic)),
            kpss_p_value: kpss.and_then(|k| finite_or_none(k.p_value)),
            kpss_lags: kpss.map(|k| k.lags),
            stationary,
        }
    }

    /// Search the ladder for the first stationary transformation of `series`.
    pub fn analyze(&self, variable: &str, series: &BTreeMap<NaiveDate, f64>) -> StationarityResult {
        let dates: Vec<NaiveDate> = series.keys().copied().collect();
        let values: Vec<f64> = series.values().copied().collect();

        let mut candidates = Vec::new();
        let mut choice = None;
        for transformation in candidate_transformations(&values) {
            let result = self.evaluate(transformation, transformation.apply(&values));
            let stationary = result.stationary;
            candidates.push(result);
            if stationary {
                choice = Some(TransformationChoice::Selected(transformation));
                break;
            }
        }

        let choice = choice.unwrap_or_else(|| {
            log::warn!(
                "No stationary transformation for '{}' ({} points); using original",
                variable,
                values.len()
            );
            TransformationChoice::Fallback(Transformation::Original)
        });

        let transformation = choice.transformation();
        let transformed = candidates
            .iter()
            .find(|c| c.transformation == transformation)
            .map(|c| c.series.clone())
            .unwrap_or_else(|| transformation.apply(&values));
        let offset = usize::from(transformation.drops_first());
        let series = dates
            .into_iter()
            .skip(offset)
            .zip(transformed)
            .collect();

        StationarityResult {
            variable: variable.to_string(),
            choice,
            series,
            candidates,
        }
    }
}
