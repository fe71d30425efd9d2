//! VECM lag order and cointegration rank selection.
//!
//! The lag order comes from AIC over VARs in levels with a constant and a
//! linear trend, converted to differences and then clamped to what the sample
//! can support. The rank comes from the Johansen trace test at that lag order.

use crate::config::PipelineConfig;
use crate::errors::{EcmAnalysisError, EcmResult};
use crate::linear_algebra::{
    columns_to_dmatrix, demean_columns, matrix_least_squares, reduced_rank_eigen, residualize,
};
use nalgebra::DMatrix;
use serde::Serialize;

/// Trace test critical values (90%, 95%, 99%) for a constant, indexed by `k - r - 1`.
const TRACE_CRITICAL_VALUES: [[f64; 3]; 5] = [
    [2.9762, 4.1296, 6.9406],
    [10.4741, 12.3212, 16.3640],
    [21.7781, 24.2761, 29.5147],
    [37.0339, 40.1749, 46.5716],
    [56.2839, 60.0627, 67.6367],
];

/// Lag order in differences that the sample can support.
///
/// Always within `1..=max(1, min(ecm_lags, n/2 - 1))`.
///
/// ```rust
/// use market_ecm::lag_rank::clamp_lag_order;
///
/// assert_eq!(clamp_lag_order(6, 3, 100), 3);
/// assert_eq!(clamp_lag_order(6, 3, 6), 2);
/// assert_eq!(clamp_lag_order(0, 3, 100), 1);
/// ```
pub fn clamp_lag_order(selected: usize, ecm_lags: usize, n: usize) -> usize {
    let by_length = (n / 2).saturating_sub(1);
    selected.min(ecm_lags).min(by_length).max(1)
}

/// Johansen trace test outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JohansenTrace {
    /// Eigenvalues in decreasing order
    pub eigenvalues: Vec<f64>,
    /// Trace statistic for `H0: rank <= r`, r = 0..k
    pub trace_statistics: Vec<f64>,
    /// 95% critical values matching `trace_statistics`
    pub critical_values_95: Vec<f64>,
    pub n_obs: usize,
}

impl JohansenTrace {
    /// First `r` whose trace statistic falls below its critical value (`k` if none).
    pub fn rank(&self) -> usize {
        self.trace_statistics
            .iter()
            .zip(&self.critical_values_95)
            .position(|(stat, crit)| stat < crit)
            .unwrap_or(self.trace_statistics.len())
    }
}

/// Johansen trace test with an unrestricted constant and `k_ar_diff` lagged differences.
///
/// `endog` holds one column per variable (2 to 5 columns).
pub fn johansen_trace(endog: &[Vec<f64>], k_ar_diff: usize) -> EcmResult<JohansenTrace> {
    let k = endog.len();
    if !(2..=TRACE_CRITICAL_VALUES.len()).contains(&k) {
        return Err(EcmAnalysisError::InvalidParameter {
            parameter: "endogenous columns".to_string(),
            value: k as f64,
            constraint: format!("2..={}", TRACE_CRITICAL_VALUES.len()),
        });
    }
    let n = endog[0].len();
    let rows = n.saturating_sub(1 + k_ar_diff);
    if rows <= k * k_ar_diff + k + 1 {
        return Err(EcmAnalysisError::InsufficientData {
            required: k * k_ar_diff + k + 3 + k_ar_diff,
            actual: n,
        });
    }

    let levels = demean_columns(&columns_to_dmatrix(endog));
    let diffs = DMatrix::from_fn(n - 1, k, |i, j| levels[(i + 1, j)] - levels[(i, j)]);

    // Lagged differences for t = k_ar_diff..n-1 (rows of `diffs`)
    let lagged = DMatrix::from_fn(rows, k * k_ar_diff, |i, c| {
        let lag = c / k + 1;
        let var = c % k;
        diffs[(i + k_ar_diff - lag, var)]
    });
    let lagged = demean_columns(&lagged);
    let dx = demean_columns(&diffs.rows(k_ar_diff, rows).into_owned());
    let lx = demean_columns(&levels.rows(k_ar_diff, rows).into_owned());

    let singular = || EcmAnalysisError::NumericalSingularity {
        lag_order: k_ar_diff,
        rank: 0,
        rows: n,
        cols: k,
    };
    let r0 = residualize(&dx, &lagged).ok_or_else(singular)?;
    let r1 = residualize(&lx, &lagged).ok_or_else(singular)?;
    let (eigenvalues, _) = reduced_rank_eigen(&r0, &r1).ok_or_else(singular)?;

    if eigenvalues.iter().any(|&l| !l.is_finite() || l >= 1.0) {
        return Err(singular());
    }

    let t = rows as f64;
    let trace_statistics = (0..k)
        .map(|r| {
            -t * eigenvalues[r..]
                .iter()
                .map(|&l| (1.0 - l.max(0.0)).ln())
                .sum::<f64>()
        })
        .collect();
    let critical_values_95 = (0..k).map(|r| TRACE_CRITICAL_VALUES[k - r - 1][1]).collect();

    Ok(JohansenTrace {
        eigenvalues,
        trace_statistics,
        critical_values_95,
        n_obs: rows,
    })
}

/// AIC of a levels VAR(p) with constant and trend on the common sample `start..n`.
fn var_aic(endog: &DMatrix<f64>, exog: &DMatrix<f64>, p: usize, start: usize) -> Option<f64> {
    let n = endog.nrows();
    let k = endog.ncols();
    let t_obs = n - start;
    let n_regressors = 2 + k * p + exog.ncols();
    if t_obs <= n_regressors {
        return None;
    }

    let design = DMatrix::from_fn(t_obs, n_regressors, |i, c| {
        let t = start + i;
        match c {
            0 => 1.0,
            1 => (t + 1) as f64,
            c if c < 2 + k * p => {
                let idx = c - 2;
                endog[(t - (idx / k + 1), idx % k)]
            }
            c => exog[(t, c - 2 - k * p)],
        }
    });
    let y = endog.rows(start, t_obs).into_owned();
    let b = matrix_least_squares(&design, &y)?;
    let resid = &y - &design * b;
    let sigma = resid.transpose() * &resid / t_obs as f64;
    let det = sigma.determinant();
    if det.is_nan() || det <= 0.0 || det.is_infinite() {
        return None;
    }
    let n_params = (k * n_regressors) as f64;
    Some(det.ln() + 2.0 * n_params / t_obs as f64)
}

/// Selected VECM specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LagRankSelection {
    /// Lag order in differences after clamping
    pub lag_order: usize,
    /// AIC choice before clamping; `None` when order selection failed
    pub aic_lag_order: Option<usize>,
    /// Cointegration rank, within `1..k`
    pub coint_rank: usize,
    pub johansen: JohansenTrace,
}

/// Picks lag order and cointegration rank for one group.
pub struct LagRankSelector {
    max_lags: usize,
    ecm_lags: usize,
}

impl LagRankSelector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_lags: config.analysis.cointegration_max_lags,
            ecm_lags: config.analysis.lag_periods,
        }
    }

    /// AIC-minimizing lag order in differences (VAR order minus one).
    ///
    /// VAR orders `1..=max_lags + 1` are compared on a common sample. `None`
    /// when no order produced a finite criterion.
    pub fn aic_order(&self, endog: &[Vec<f64>], exog: &[Vec<f64>]) -> Option<usize> {
        let n = endog.first().map_or(0, |c| c.len());
        let max_var_order = self.max_lags + 1;
        if n <= max_var_order {
            return None;
        }
        let endog = columns_to_dmatrix(endog);
        let exog = if exog.is_empty() {
            DMatrix::zeros(n, 0)
        } else {
            columns_to_dmatrix(exog)
        };

        let mut best: Option<(f64, usize)> = None;
        for p in 1..=max_var_order {
            if let Some(aic) = var_aic(&endog, &exog, p, max_var_order) {
                if aic.is_finite() && best.map_or(true, |(b, _)| aic < b) {
                    best = Some((aic, p));
                }
            }
        }
        best.map(|(_, p)| p - 1)
    }

    /// Lag order after the fallback and the mandatory clamp.
    pub fn lag_order(&self, endog: &[Vec<f64>], exog: &[Vec<f64>]) -> (Option<usize>, usize) {
        let n = endog.first().map_or(0, |c| c.len());
        let aic = self.aic_order(endog, exog);
        let selected = aic.unwrap_or_else(|| {
            log::warn!(
                "Lag order selection failed (n = {}); falling back to lag_periods = {}",
                n,
                self.ecm_lags
            );
            self.ecm_lags
        });
        (aic, clamp_lag_order(selected, self.ecm_lags, n))
    }

    /// Lag order and rank; rank 0 is [`EcmAnalysisError::NoCointegration`].
    pub fn select(&self, endog: &[Vec<f64>], exog: &[Vec<f64>]) -> EcmResult<LagRankSelection> {
        let (aic_lag_order, lag_order) = self.lag_order(endog, exog);
        let johansen = johansen_trace(endog, lag_order)?;
        let raw_rank = johansen.rank();
        if raw_rank == 0 {
            return Err(EcmAnalysisError::NoCointegration {
                reason: format!(
                    "Johansen trace rank 0 at lag order {} (trace {:.3} < {:.3})",
                    lag_order, johansen.trace_statistics[0], johansen.critical_values_95[0]
                ),
            });
        }
        let coint_rank = raw_rank.min(endog.len() - 1);
        Ok(LagRankSelection {
            lag_order,
            aic_lag_order,
            coint_rank,
            johansen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn cointegrated_pair(n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut x = Vec::with_capacity(n);
        let mut level = 10.0;
        for _ in 0..n {
            level += normal.sample(&mut rng);
            x.push(level);
        }
        let y = x.iter().map(|v| 1.0 + v + 0.5 * normal.sample(&mut rng)).collect();
        vec![y, x]
    }

    fn independent_walks(n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..2)
            .map(|_| {
                let mut level = 0.0;
                (0..n)
                    .map(|_| {
                        level += normal.sample(&mut rng);
                        level
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_clamp_bounds_for_all_sizes() {
        for n in 4..60 {
            for selected in 0..12 {
                for ecm_lags in 1..6 {
                    let lag = clamp_lag_order(selected, ecm_lags, n);
                    assert!(lag >= 1);
                    assert!(lag <= ecm_lags.min(n / 2 - 1), "n={} lag={}", n, lag);
                }
            }
        }
    }

    #[test]
    fn test_trace_test_finds_rank_one() {
        let data = cointegrated_pair(300, 17);
        let trace = johansen_trace(&data, 1).unwrap();
        assert_eq!(trace.trace_statistics.len(), 2);
        assert!(trace.trace_statistics[0] > trace.trace_statistics[1]);
        assert_eq!(trace.rank(), 1);
    }

    #[test]
    fn test_independent_walks_usually_rank_zero() {
        let mut zero = 0;
        for seed in 0..10 {
            if johansen_trace(&independent_walks(200, seed), 1).unwrap().rank() == 0 {
                zero += 1;
            }
        }
        assert!(zero >= 7, "rank zero in {} of 10", zero);
    }

    #[test]
    fn test_select_reports_no_cointegration() {
        let config = PipelineConfig::default();
        let selector = LagRankSelector::new(&config);
        let mut saw_no_coint = false;
        for seed in 0..10 {
            match selector.select(&independent_walks(150, seed), &[]) {
                Err(EcmAnalysisError::NoCointegration { .. }) => saw_no_coint = true,
                Ok(sel) => assert!(sel.coint_rank == 1),
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert!(saw_no_coint);
    }

    #[test]
    fn test_select_respects_clamp_on_short_sample() {
        let mut config = PipelineConfig::default();
        config.analysis.lag_periods = 4;
        config.analysis.cointegration_max_lags = 8;
        let selector = LagRankSelector::new(&config);
        let data = cointegrated_pair(12, 3);
        let (_, lag) = selector.lag_order(&data, &[]);
        assert!(lag >= 1);
        assert!(lag <= 4.min(12 / 2 - 1));
    }

    #[test]
    fn test_order_selection_fallback_when_sample_too_short() {
        let config = PipelineConfig::default();
        let selector = LagRankSelector::new(&config);
        let data = cointegrated_pair(5, 1);
        let (aic, lag) = selector.lag_order(&data, &[]);
        assert_eq!(aic, None);
        assert_eq!(lag, clamp_lag_order(config.analysis.lag_periods, config.analysis.lag_periods, 5));
    }
}
