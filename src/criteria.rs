//! Information criteria of a fitted VECM.

use crate::ecm::EcmFit;
use crate::math_utils::finite_or_none;
use serde::Serialize;

/// Deterministic terms counted for a constant restricted to the cointegration space.
const TREND_TERMS: usize = 1;

/// AIC, BIC and HQIC with the inputs they were computed from.
///
/// All three are `None` when the log-likelihood is not finite or the residual
/// count does not exceed the parameter count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitMetrics {
    pub aic: Option<f64>,
    pub bic: Option<f64>,
    pub hqic: Option<f64>,
    pub llf: Option<f64>,
    pub n_obs: usize,
    pub n_params: usize,
}

/// Criteria from a log-likelihood, residual count `n` and parameter count `k`.
pub fn information_criteria(llf: f64, n: usize, k: usize) -> FitMetrics {
    let unavailable = FitMetrics {
        aic: None,
        bic: None,
        hqic: None,
        llf: finite_or_none(llf),
        n_obs: n,
        n_params: k,
    };
    if !llf.is_finite() || n <= k {
        return unavailable;
    }
    let n_f = n as f64;
    let k_f = k as f64;
    let base = -2.0 * llf;
    FitMetrics {
        aic: finite_or_none(base + 2.0 * k_f),
        bic: finite_or_none(base + n_f.ln() * k_f),
        // ln(ln n) is negative below e; HQIC is still reported
        hqic: finite_or_none(base + 2.0 * n_f.ln().ln() * k_f),
        ..unavailable
    }
}

/// Computes [`FitMetrics`] for fitted models.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelCriteriaCalculator;

impl ModelCriteriaCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Parameter count `lag_order + trend terms + coint_rank`.
    pub fn parameter_count(fit: &EcmFit) -> usize {
        fit.lag_order + TREND_TERMS + fit.coint_rank
    }

    pub fn calculate(&self, fit: &EcmFit) -> FitMetrics {
        let metrics = information_criteria(fit.llf, fit.n_obs(), Self::parameter_count(fit));
        if metrics.aic.is_none() {
            log::debug!(
                "Information criteria not computable (llf = {}, n = {}, k = {})",
                fit.llf,
                metrics.n_obs,
                metrics.n_params
            );
        }
        metrics
    }
}
