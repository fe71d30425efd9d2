//! Vector error-correction model estimation.
//!
//! Maximum-likelihood (Johansen) estimation with the constant restricted to
//! the cointegration space:
//!
//! ```text
//! Δy_t = α β' [y_{t-1}; 1] + Σ_{i=1..p} Γ_i Δy_{t-i} + Θ x_t + u_t
//! ```
//!
//! β is normalized so that its leading `r × r` block is the identity.

use crate::config::PipelineConfig;
use crate::diagnostics::ResidualSeries;
use crate::errors::{validate_all_finite, EcmAnalysisError, EcmResult};
use crate::grouping::AlignedData;
use crate::linear_algebra::{columns_to_dmatrix, matrix_least_squares, reduced_rank_eigen, residualize};
use crate::math_utils::finite_or_none;
use crate::vif::{vif_screen, VifScreen};
use chrono::NaiveDate;
use nalgebra::DMatrix;
use serde::Serialize;
use std::f64::consts::PI;

// ============================================================================
// FITTED MODEL
// ============================================================================

/// A fitted VECM.
#[derive(Debug, Clone)]
pub struct EcmFit {
    /// Lagged differences per equation
    pub lag_order: usize,
    pub coint_rank: usize,
    /// Endogenous variable names, in column order
    pub variables: Vec<String>,
    /// Exogenous regressors entering the short-run dynamics
    pub exogenous: Vec<String>,
    /// Adjustment coefficients, `k × r`
    pub alpha: DMatrix<f64>,
    /// Cointegrating vectors, `(k + 1) × r`; the last row is the constant
    pub beta: DMatrix<f64>,
    /// Short-run coefficients, `k × (k·p + m)`: lag 1 block first, exogenous last
    pub gamma: DMatrix<f64>,
    pub residuals: ResidualSeries,
    /// Fitted differences, `T × k`
    pub fitted: DMatrix<f64>,
    /// Residual covariance `U'U / T`
    pub sigma_u: DMatrix<f64>,
    pub llf: f64,
    /// Short-run regressor design (constant, error-correction terms, lagged
    /// differences, exogenous), predictor-major
    pub design: Vec<Vec<f64>>,
    /// Date of every residual row
    pub dates: Vec<NaiveDate>,
    /// Reduced-rank eigenvalues in decreasing order
    pub eigenvalues: Vec<f64>,
}

impl EcmFit {
    pub fn n_obs(&self) -> usize {
        self.fitted.nrows()
    }

    pub fn n_equations(&self) -> usize {
        self.variables.len()
    }

    /// `Π = α β'` restricted to the endogenous rows of β.
    pub fn pi(&self) -> DMatrix<f64> {
        let k = self.n_equations();
        &self.alpha * self.beta.rows(0, k).transpose()
    }

    /// Levels-VAR coefficient matrices `A_1 .. A_{p+1}`.
    pub fn var_representation(&self) -> Vec<DMatrix<f64>> {
        let k = self.n_equations();
        let p = self.lag_order;
        let gamma_lag = |i: usize| self.gamma.columns(i * k, k).into_owned();

        let mut a = Vec::with_capacity(p + 1);
        let mut first = DMatrix::identity(k, k) + self.pi();
        if p > 0 {
            first += gamma_lag(0);
        }
        a.push(first);
        for i in 1..p {
            a.push(gamma_lag(i) - gamma_lag(i - 1));
        }
        if p > 0 {
            a.push(-gamma_lag(p - 1));
        }
        a
    }

    /// Serializable view of the estimated coefficients.
    pub fn summary(&self) -> EcmModelSummary {
        EcmModelSummary {
            variables: self.variables.clone(),
            exogenous: self.exogenous.clone(),
            n_obs: self.n_obs(),
            alpha: matrix_rows(&self.alpha),
            beta: matrix_rows(&self.beta),
            gamma: matrix_rows(&self.gamma),
            sigma_u: matrix_rows(&self.sigma_u),
            eigenvalues: self.eigenvalues.iter().map(|&v| finite_or_none(v)).collect(),
            llf: finite_or_none(self.llf),
        }
    }
}

/// Estimated coefficients with non-finite entries as `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EcmModelSummary {
    pub variables: Vec<String>,
    pub exogenous: Vec<String>,
    pub n_obs: usize,
    pub alpha: Vec<Vec<Option<f64>>>,
    pub beta: Vec<Vec<Option<f64>>>,
    pub gamma: Vec<Vec<Option<f64>>>,
    pub sigma_u: Vec<Vec<Option<f64>>>,
    pub eigenvalues: Vec<Option<f64>>,
    pub llf: Option<f64>,
}

pub(crate) fn matrix_rows(m: &DMatrix<f64>) -> Vec<Vec<Option<f64>>> {
    m.row_iter()
        .map(|row| row.iter().map(|&v| finite_or_none(v)).collect())
        .collect()
}

// ============================================================================
// IMPULSE RESPONSES
// ============================================================================

/// Moving-average responses of the levels system.
///
/// `responses[h][i][j]` is the response of variable `i` at horizon `h` to a
/// unit shock in variable `j`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpulseResponses {
    pub periods: usize,
    pub variables: Vec<String>,
    pub responses: Vec<Vec<Vec<Option<f64>>>>,
    /// Responses to one-standard-deviation orthogonal shocks (Cholesky of Σu);
    /// `None` when Σu is not positive definite
    pub orthogonalized: Option<Vec<Vec<Vec<Option<f64>>>>>,
}

/// MA coefficients `Φ_0 .. Φ_periods` of the levels VAR implied by `fit`.
pub fn ma_coefficients(fit: &EcmFit, periods: usize) -> Vec<DMatrix<f64>> {
    let k = fit.n_equations();
    let a = fit.var_representation();
    let mut phi: Vec<DMatrix<f64>> = Vec::with_capacity(periods + 1);
    phi.push(DMatrix::identity(k, k));
    for h in 1..=periods {
        let mut next = DMatrix::zeros(k, k);
        for (i, a_i) in a.iter().enumerate().take(h) {
            next += &phi[h - i - 1] * a_i;
        }
        phi.push(next);
    }
    phi
}

pub fn impulse_responses(fit: &EcmFit, periods: usize) -> ImpulseResponses {
    let phi = ma_coefficients(fit, periods);
    let orthogonalized = fit.sigma_u.clone().cholesky().map(|chol| {
        let p = chol.l();
        phi.iter().map(|m| matrix_rows(&(m * &p))).collect()
    });
    if orthogonalized.is_none() {
        log::debug!("Orthogonalized IRF unavailable: residual covariance not positive definite");
    }
    ImpulseResponses {
        periods,
        variables: fit.variables.clone(),
        responses: phi.iter().map(matrix_rows).collect(),
        orthogonalized,
    }
}

// ============================================================================
// ESTIMATOR
// ============================================================================

/// Fits the VECM for one group.
pub struct EcmEstimator {
    vif_threshold: f64,
    irf_periods: usize,
}

impl EcmEstimator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            vif_threshold: config.analysis.vif_threshold,
            irf_periods: config.analysis.irf_periods,
        }
    }

    /// VIF screen of the exogenous regressors; a no-op without any.
    pub fn screen_exogenous(&self, exogenous: Vec<(String, Vec<f64>)>) -> VifScreen {
        if exogenous.is_empty() {
            return VifScreen {
                kept: exogenous,
                dropped: Vec::new(),
            };
        }
        vif_screen(exogenous, self.vif_threshold)
    }

    pub fn impulse_responses(&self, fit: &EcmFit) -> ImpulseResponses {
        impulse_responses(fit, self.irf_periods)
    }

    /// Maximum-likelihood fit with `lag_order` lagged differences and
    /// cointegration rank `coint_rank` (`1..k`).
    ///
    /// # Errors
    /// [`EcmAnalysisError::InsufficientData`] when the sample cannot support
    /// the regressors; [`EcmAnalysisError::NumericalSingularity`] when a moment
    /// matrix is singular or the residual covariance is degenerate.
    pub fn estimate(
        &self,
        data: &AlignedData,
        variables: &[String],
        lag_order: usize,
        coint_rank: usize,
    ) -> EcmResult<EcmFit> {
        let k = data.endogenous.len();
        let n = data.dates.len();
        let p = lag_order;
        let m = data.exogenous.len();

        if k < 2 || coint_rank == 0 || coint_rank >= k {
            return Err(EcmAnalysisError::InvalidParameter {
                parameter: "coint_rank".to_string(),
                value: coint_rank as f64,
                constraint: format!("1..{} for {} variables", k, k),
            });
        }
        for (name, column) in variables.iter().zip(&data.endogenous) {
            validate_all_finite(column, name)?;
        }
        for (name, column) in &data.exogenous {
            validate_all_finite(column, name)?;
        }
        let n_short_run = k * p + m;
        let t_obs = n.saturating_sub(p + 1);
        if t_obs <= n_short_run + k + 1 {
            return Err(EcmAnalysisError::InsufficientData {
                required: n_short_run + k + p + 3,
                actual: n,
            });
        }

        let singular = || EcmAnalysisError::NumericalSingularity {
            lag_order,
            rank: coint_rank,
            rows: n,
            cols: k,
        };

        let levels = columns_to_dmatrix(&data.endogenous);
        let exog = columns_to_dmatrix(&data.exogenous.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>());
        let diff = |t: usize, j: usize| levels[(t, j)] - levels[(t - 1, j)];

        // Sample rows t = p+1 .. n-1
        let start = p + 1;
        let dy = DMatrix::from_fn(t_obs, k, |i, j| diff(start + i, j));
        let y_lag = DMatrix::from_fn(t_obs, k + 1, |i, j| {
            if j < k {
                levels[(start + i - 1, j)]
            } else {
                1.0
            }
        });
        let dx = DMatrix::from_fn(t_obs, n_short_run, |i, c| {
            let t = start + i;
            if c < k * p {
                diff(t - (c / k + 1), c % k)
            } else {
                exog[(t, c - k * p)]
            }
        });

        let r0 = residualize(&dy, &dx).ok_or_else(singular)?;
        let r1 = residualize(&y_lag, &dx).ok_or_else(singular)?;
        let (eigenvalues, vectors) = reduced_rank_eigen(&r0, &r1).ok_or_else(singular)?;

        let t = t_obs as f64;
        let s11 = r1.transpose() * &r1 / t;
        let s01 = r0.transpose() * &r1 / t;

        let beta_raw = vectors.columns(0, coint_rank).into_owned();
        let lead = beta_raw.rows(0, coint_rank).into_owned();
        let beta = &beta_raw * lead.try_inverse().ok_or_else(singular)?;
        let alpha = &s01 * &beta * (beta.transpose() * &s11 * &beta).try_inverse().ok_or_else(singular)?;

        let long_run = &y_lag * &beta * alpha.transpose();
        let adjusted = &dy - &long_run;
        let gamma_t = matrix_least_squares(&dx, &adjusted).ok_or_else(singular)?;
        let residuals = &adjusted - &dx * &gamma_t;
        let fitted = &dy - &residuals;

        let sigma_u = residuals.transpose() * &residuals / t;
        let det = sigma_u.determinant();
        if det.is_nan() || det <= 0.0 || det.is_infinite() {
            log::debug!("VECM residual covariance determinant {} is not positive", det);
            return Err(singular());
        }
        let k_f = k as f64;
        let llf = -(t * k_f / 2.0) * (1.0 + (2.0 * PI).ln()) - (t / 2.0) * det.ln();

        let ect = &y_lag * &beta;
        let mut design: Vec<Vec<f64>> = vec![vec![1.0; t_obs]];
        design.extend(ect.column_iter().map(|c| c.iter().copied().collect()));
        design.extend(dx.column_iter().map(|c| c.iter().copied().collect()));

        Ok(EcmFit {
            lag_order,
            coint_rank,
            variables: variables.to_vec(),
            exogenous: data.exogenous.iter().map(|(name, _)| name.clone()).collect(),
            alpha,
            beta,
            gamma: gamma_t.transpose(),
            residuals: ResidualSeries::from_matrix(variables, &residuals),
            fitted,
            sigma_u,
            llf,
            design,
            dates: data.dates[start..].to_vec(),
            eigenvalues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    /// y adjusts towards 1 + x at rate 0.4; x is a random walk.
    fn error_correcting(n: usize, seed: u64) -> AlignedData {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut x = vec![20.0];
        let mut y = vec![21.0];
        for t in 1..n {
            let gap = y[t - 1] - x[t - 1] - 1.0;
            x.push(x[t - 1] + normal.sample(&mut rng));
            y.push(y[t - 1] - 0.4 * gap + 0.5 * normal.sample(&mut rng));
        }
        AlignedData {
            dates: dates(n),
            endogenous: vec![y, x],
            exogenous: Vec::new(),
        }
    }

    fn names() -> Vec<String> {
        vec!["y".to_string(), "x".to_string()]
    }

    fn estimator() -> EcmEstimator {
        EcmEstimator::new(&PipelineConfig::default())
    }

    #[test]
    fn test_recovers_cointegrating_vector() {
        let data = error_correcting(400, 11);
        let fit = estimator().estimate(&data, &names(), 1, 1).unwrap();

        assert_eq!(fit.beta.shape(), (3, 1));
        assert_approx_eq!(fit.beta[(0, 0)], 1.0, 1e-10);
        assert!((fit.beta[(1, 0)] + 1.0).abs() < 0.1, "beta = {}", fit.beta);
        assert!((fit.beta[(2, 0)] + 1.0).abs() < 0.5, "beta = {}", fit.beta);
        assert!(fit.alpha[(0, 0)] < -0.2, "alpha = {}", fit.alpha);
        assert!(fit.alpha[(1, 0)].abs() < 0.15);

        assert_eq!(fit.n_obs(), 398);
        assert_eq!(fit.dates.len(), 398);
        assert_eq!(fit.residuals.n_equations(), 2);
        assert_eq!(fit.residuals.n_obs(), 398);
        assert_eq!(fit.gamma.shape(), (2, 2));
        assert_eq!(fit.design.len(), 1 + 1 + 2);
        assert!(fit.llf.is_finite());
    }

    #[test]
    fn test_exogenous_columns_extend_gamma() {
        let mut data = error_correcting(200, 5);
        let z: Vec<f64> = (0..200).map(|i| (i as f64 * 0.37).sin()).collect();
        data.exogenous.push(("z".to_string(), z));
        let fit = estimator().estimate(&data, &names(), 2, 1).unwrap();
        assert_eq!(fit.gamma.shape(), (2, 2 * 2 + 1));
        assert_eq!(fit.exogenous, vec!["z".to_string()]);
    }

    #[test]
    fn test_identical_columns_are_singular() {
        let mut data = error_correcting(100, 3);
        data.endogenous[1] = data.endogenous[0].clone();
        let err = estimator().estimate(&data, &names(), 1, 1).unwrap_err();
        assert!(matches!(
            err,
            EcmAnalysisError::NumericalSingularity { lag_order: 1, rank: 1, rows: 100, cols: 2 }
        ));
    }

    #[test]
    fn test_short_sample_and_bad_rank() {
        let data = error_correcting(6, 1);
        assert!(matches!(
            estimator().estimate(&data, &names(), 2, 1),
            Err(EcmAnalysisError::InsufficientData { .. })
        ));
        let data = error_correcting(50, 1);
        assert!(matches!(
            estimator().estimate(&data, &names(), 1, 2),
            Err(EcmAnalysisError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_impulse_responses_shape_and_impact() {
        let data = error_correcting(300, 8);
        let fit = estimator().estimate(&data, &names(), 2, 1).unwrap();
        assert_eq!(fit.var_representation().len(), 3);

        let irf = impulse_responses(&fit, 10);
        assert_eq!(irf.responses.len(), 11);
        assert_eq!(irf.responses[0], vec![vec![Some(1.0), Some(0.0)], vec![Some(0.0), Some(1.0)]]);

        let orth = irf.orthogonalized.unwrap();
        let sd = fit.sigma_u[(0, 0)].sqrt();
        assert_approx_eq!(orth[0][0][0].unwrap(), sd, 1e-10);
        assert_eq!(orth[0][0][1], Some(0.0));
    }

    #[test]
    fn test_var_representation_sums_to_identity_plus_pi() {
        let data = error_correcting(200, 13);
        let fit = estimator().estimate(&data, &names(), 3, 1).unwrap();
        let total = fit
            .var_representation()
            .into_iter()
            .fold(DMatrix::zeros(2, 2), |acc, a| acc + a);
        let expected = DMatrix::identity(2, 2) + fit.pi();
        assert!((total - expected).abs().max() < 1e-10);
    }

    #[test]
    fn test_screen_without_exogenous_is_noop() {
        let screen = estimator().screen_exogenous(Vec::new());
        assert!(screen.kept.is_empty());
        assert!(screen.dropped.is_empty());
    }
}
