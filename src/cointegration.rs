//! Engle-Granger residual-based cointegration test.

use crate::config::PipelineConfig;
use crate::errors::{EcmAnalysisError, EcmResult};
use crate::linear_algebra::ols_fit;
use crate::math_utils::{calculate_autocorrelations, finite_or_none};
use crate::stationarity::{
    adf_statistic, mackinnon_critical_values, mackinnon_p_value, AdfRegression, CriticalValues,
    StationarityResult, Transformation,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Cointegrating regression `y = intercept + slope·x + e`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CointegratingRegression {
    pub intercept: f64,
    pub slope: f64,
}

/// Outcome of an Engle-Granger test on an aligned pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CointegrationResult {
    /// ADF t-statistic of the residuals; `None` for an exact linear fit
    pub test_statistic: Option<f64>,
    pub p_value: f64,
    pub critical_values: CriticalValues,
    pub cointegrated: bool,
    /// Lag-1 autocorrelation of the cointegrating residuals
    pub rho: Option<f64>,
    /// Lagged differences used by the residual ADF regression
    pub used_lag: Option<usize>,
    pub n_obs: usize,
    pub coefficients: CointegratingRegression,
    pub y_transformation: Option<Transformation>,
    pub x_transformation: Option<Transformation>,
}

/// Inner-join two dated series and drop pairs with a non-finite member.
pub fn align_pair(
    y: &BTreeMap<NaiveDate, f64>,
    x: &BTreeMap<NaiveDate, f64>,
) -> (Vec<NaiveDate>, Vec<f64>, Vec<f64>) {
    let mut dates = Vec::new();
    let mut ys = Vec::new();
    let mut xs = Vec::new();
    for (date, &yv) in y {
        if let Some(&xv) = x.get(date) {
            if yv.is_finite() && xv.is_finite() {
                dates.push(*date);
                ys.push(yv);
                xs.push(xv);
            }
        }
    }
    (dates, ys, xs)
}

/// Engle-Granger test on aligned values, at significance `alpha`.
///
/// Fails with [`EcmAnalysisError::InsufficientData`] below two pairs or when
/// the residual ADF regression cannot be formed.
pub fn engle_granger(y: &[f64], x: &[f64], alpha: f64) -> EcmResult<CointegrationResult> {
    let n = y.len().min(x.len());
    if n < 2 {
        return Err(EcmAnalysisError::InsufficientData {
            required: 2,
            actual: n,
        });
    }
    let (y, x) = (&y[..n], &x[..n]);

    let fit = ols_fit(&[vec![1.0; n], x.to_vec()], y)?;
    let coefficients = CointegratingRegression {
        intercept: fit.coefficients[0],
        slope: fit.coefficients[1],
    };
    let critical_values = mackinnon_critical_values(2, n - 1)?;
    let rho = finite_or_none(calculate_autocorrelations(&fit.residuals, 1)[1]);

    if fit.r_squared >= 1.0 - 100.0 * f64::EPSILON.sqrt() {
        log::debug!("Engle-Granger: exact linear relation (R² = {})", fit.r_squared);
        return Ok(CointegrationResult {
            test_statistic: None,
            p_value: 0.0,
            critical_values,
            cointegrated: true,
            rho,
            used_lag: None,
            n_obs: n,
            coefficients,
            y_transformation: None,
            x_transformation: None,
        });
    }

    let adf = adf_statistic(&fit.residuals, AdfRegression::NoConstant, None)?;
    let p_value = mackinnon_p_value(adf.statistic, 2)?;

    Ok(CointegrationResult {
        test_statistic: Some(adf.statistic),
        p_value,
        critical_values,
        cointegrated: p_value < alpha,
        rho,
        used_lag: Some(adf.used_lag),
        n_obs: n,
        coefficients,
        y_transformation: None,
        x_transformation: None,
    })
}

/// Tests whether two stationarity-analysed variables share a long-run relation.
pub struct CointegrationAnalyzer {
    significance: f64,
}

impl CointegrationAnalyzer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            significance: config.analysis.cointegration_significance_level,
        }
    }

    /// Engle-Granger test of `y` on `x`, each in its selected transformation.
    pub fn analyze(
        &self,
        y: &StationarityResult,
        x: &StationarityResult,
    ) -> EcmResult<CointegrationResult> {
        let (_, ys, xs) = align_pair(&y.series, &x.series);
        let mut result = engle_granger(&ys, &xs, self.significance)?;
        result.y_transformation = Some(y.choice.transformation());
        result.x_transformation = Some(x.choice.transformation());
        log::debug!(
            "Engle-Granger {} ~ {}: p = {:.4}, cointegrated = {}",
            y.variable,
            x.variable,
            result.p_value,
            result.cointegrated
        );
        Ok(result)
    }
}
