//! Granger causality between group variables.
//!
//! Tests run on first differences. For lag `L` the restricted regression is
//! `Δy_t` on a constant and `L` own lags; the unrestricted one adds `L` lags
//! of the cause.

use crate::config::{ExogenousSpec, PipelineConfig};
use crate::diagnostics::ChiSquaredTest;
use crate::errors::{validate_data_length, EcmAnalysisError, EcmResult};
use crate::grouping::AlignedData;
use crate::linear_algebra::{lagged_columns, ols_fit};
use crate::math_utils::{chi_squared_sf, f_sf};
use serde::Serialize;
use std::collections::BTreeMap;

/// F test with its degrees of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FTest {
    pub statistic: f64,
    pub p_value: f64,
    pub df_num: usize,
    pub df_den: usize,
}

/// The three statistics for one lag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GrangerLagResult {
    pub ssr_f: FTest,
    pub ssr_chi2: ChiSquaredTest,
    pub likelihood_ratio: ChiSquaredTest,
}

/// Does `cause` help predict `effect`? One entry per tested lag, empty on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrangerCausality {
    pub cause: String,
    pub effect: String,
    pub lags: BTreeMap<usize, GrangerLagResult>,
}

fn first_differences(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Granger test of `cause → effect` at a single lag.
pub fn granger_test(effect: &[f64], cause: &[f64], lag: usize) -> EcmResult<GrangerLagResult> {
    let n = effect.len().min(cause.len());
    if lag == 0 {
        return Err(EcmAnalysisError::InvalidParameter {
            parameter: "lag".to_string(),
            value: 0.0,
            constraint: ">= 1".to_string(),
        });
    }
    let (effect, cause) = (&effect[..n], &cause[..n]);
    validate_data_length(effect, 3 * lag + 2, "granger_test")?;
    let nobs = n - lag;
    let y = &effect[lag..];

    let mut restricted_cols = vec![vec![1.0; nobs]];
    restricted_cols.extend(lagged_columns(effect, lag));
    let mut full_cols = restricted_cols.clone();
    full_cols.extend(lagged_columns(cause, lag));

    let restricted = ols_fit(&restricted_cols, y)?;
    let full = ols_fit(&full_cols, y)?;
    if full.ssr <= 0.0 {
        return Err(EcmAnalysisError::numerical(
            "unrestricted regression fits exactly",
            "granger_test",
        ));
    }

    let df_den = full.df_resid();
    let ratio = (restricted.ssr - full.ssr) / full.ssr;
    let f_stat = ratio / lag as f64 * df_den as f64;
    let chi2_stat = nobs as f64 * ratio;
    let lr_stat = -2.0 * (restricted.log_likelihood() - full.log_likelihood());

    Ok(GrangerLagResult {
        ssr_f: FTest {
            statistic: f_stat,
            p_value: f_sf(f_stat, lag as f64, df_den as f64)?,
            df_num: lag,
            df_den,
        },
        ssr_chi2: ChiSquaredTest {
            statistic: chi2_stat,
            p_value: chi_squared_sf(chi2_stat, lag as f64)?,
            df: lag,
        },
        likelihood_ratio: ChiSquaredTest {
            statistic: lr_stat,
            p_value: chi_squared_sf(lr_stat, lag as f64)?,
            df: lag,
        },
    })
}

/// Runs the Granger tests the pipeline variant calls for.
pub struct CausalityAnalyzer {
    max_lags: usize,
    variant: ExogenousSpec,
}

impl CausalityAnalyzer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_lags: config.analysis.granger_max_lags,
            variant: config.analysis.exogenous_spec,
        }
    }

    /// Highest lag tested for `n` differenced observations.
    pub fn lag_limit(&self, n: usize) -> usize {
        self.max_lags.min((n / 5).max(1))
    }

    /// `cause → effect` at every lag up to [`Self::lag_limit`].
    ///
    /// Any failing lag empties the result for this cause.
    pub fn test_pair(&self, cause_name: &str, cause: &[f64], effect_name: &str, effect: &[f64]) -> GrangerCausality {
        let d_cause = first_differences(cause);
        let d_effect = first_differences(effect);
        let max_lag = self.lag_limit(d_effect.len().min(d_cause.len()));

        let lags: EcmResult<BTreeMap<usize, GrangerLagResult>> = (1..=max_lag)
            .map(|lag| granger_test(&d_effect, &d_cause, lag).map(|r| (lag, r)))
            .collect();
        let lags = lags.unwrap_or_else(|e| {
            log::warn!("Granger causality {} -> {} failed: {}", cause_name, effect_name, e);
            BTreeMap::new()
        });

        GrangerCausality {
            cause: cause_name.to_string(),
            effect: effect_name.to_string(),
            lags,
        }
    }

    /// Every causal direction of the variant, keyed by cause name.
    ///
    /// With exogenous regressors in the cross-region variant each of them is
    /// tested against the first endogenous variable; otherwise the second
    /// endogenous variable is tested against the first.
    pub fn analyze(&self, data: &AlignedData, names: &[String]) -> BTreeMap<String, GrangerCausality> {
        let mut out = BTreeMap::new();
        let (Some(effect), Some(effect_name)) = (data.endogenous.first(), names.first()) else {
            return out;
        };

        if self.variant == ExogenousSpec::CrossRegionPrice && !data.exogenous.is_empty() {
            for (name, column) in &data.exogenous {
                out.insert(name.clone(), self.test_pair(name, column, effect_name, effect));
            }
        } else if let (Some(cause), Some(cause_name)) = (data.endogenous.get(1), names.get(1)) {
            out.insert(cause_name.clone(), self.test_pair(cause_name, cause, effect_name, effect));
        }
        out
    }
}
