//! Linear algebra routines for the regression-based tests.
//!
//! Householder QR least squares for the univariate auxiliary regressions
//! (ADF, Engle-Granger, Breusch-Godfrey, ARCH, White, Granger, VIF) and the
//! `nalgebra` conversions used by the multivariate VAR/VECM code.

use crate::errors::{EcmAnalysisError, EcmResult};
use crate::math_utils::float_total_cmp;
use nalgebra::DMatrix;

/// Validates that a vector contains no NaN or Inf values
fn ensure_finite_vector(v: &[f64], operation: &str) -> EcmResult<()> {
    for (i, &val) in v.iter().enumerate() {
        if !val.is_finite() {
            return Err(EcmAnalysisError::numerical(
                format!("Non-finite value ({}) at position [{}]", val, i),
                operation,
            ));
        }
    }
    Ok(())
}

/// Validates that a matrix is rectangular (not ragged) and non-empty
fn ensure_rectangular_matrix(a: &[Vec<f64>]) -> EcmResult<(usize, usize)> {
    if a.is_empty() {
        return Err(EcmAnalysisError::numerical(
            "Empty matrix provided",
            "matrix_validation",
        ));
    }

    let n = a[0].len();
    if n == 0 {
        return Err(EcmAnalysisError::numerical(
            "Zero-width matrix (no columns)",
            "matrix_validation",
        ));
    }

    if !a.iter().all(|row| row.len() == n) {
        return Err(EcmAnalysisError::numerical(
            "Ragged matrix (inconsistent row lengths)",
            "matrix_validation",
        ));
    }

    Ok((a.len(), n))
}

/// Upper-triangular factor and transformed response of a Householder QR.
struct HouseholderFactor {
    /// R, n×n upper triangular (row-major)
    r: Vec<Vec<f64>>,
    /// First n entries of Q'b
    qtb: Vec<f64>,
    rank_tol: f64,
}

/// Householder QR of an m×n row-major matrix, applying the reflectors to `b`
/// without materializing Q.
fn householder_factor(a: &[Vec<f64>], b: &[f64], operation: &str) -> EcmResult<HouseholderFactor> {
    let (m, n) = ensure_rectangular_matrix(a)?;
    for row in a {
        ensure_finite_vector(row, operation)?;
    }
    ensure_finite_vector(b, operation)?;

    if m != b.len() {
        return Err(EcmAnalysisError::numerical(
            "Matrix-vector dimension mismatch in QR solve",
            operation,
        ));
    }
    if n > m {
        return Err(EcmAnalysisError::InsufficientData {
            required: n,
            actual: m,
        });
    }

    let mut r = a.to_vec();
    let mut y = b.to_vec();

    let matrix_norm = r
        .iter()
        .flat_map(|row| row.iter())
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt();
    // tol = c * max(m,n) * eps * ||A||_F
    let rank_tol = 100.0 * f64::EPSILON * (m.max(n) as f64) * matrix_norm.max(1.0);

    let steps = n.min(m.saturating_sub(1));
    for k in 0..steps {
        let mut v: Vec<f64> = (k..m).map(|i| r[i][k]).collect();
        let norm_v = v.iter().map(|vi| vi * vi).sum::<f64>().sqrt();
        if norm_v < rank_tol {
            for row in r.iter_mut().skip(k) {
                row[k] = 0.0;
            }
            continue;
        }

        let sign = if v[0] >= 0.0 { 1.0 } else { -1.0 };
        v[0] += sign * norm_v;
        let norm_v2 = v.iter().map(|vi| vi * vi).sum::<f64>().sqrt();
        if norm_v2 < rank_tol {
            continue;
        }
        for vi in &mut v {
            *vi /= norm_v2;
        }

        for j in k..n {
            let dot: f64 = (k..m).map(|i| v[i - k] * r[i][j]).sum();
            for i in k..m {
                r[i][j] -= 2.0 * v[i - k] * dot;
            }
        }

        let dot_y: f64 = (k..m).map(|i| v[i - k] * y[i]).sum();
        for i in k..m {
            y[i] -= 2.0 * v[i - k] * dot_y;
        }
    }

    r.truncate(n);
    y.truncate(n);
    Ok(HouseholderFactor {
        r,
        qtb: y,
        rank_tol,
    })
}

/// Economy QR solve of the least squares problem `min ||Ax - b||`.
///
/// `a` is row-major (m observations × n columns). Numerically dependent
/// columns get a zero coefficient.
pub fn economy_qr_solve(a: &[Vec<f64>], b: &[f64]) -> EcmResult<Vec<f64>> {
    let factor = householder_factor(a, b, "economy_qr_solve")?;
    let n = factor.r.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        if factor.r[i][i].abs() < factor.rank_tol {
            x[i] = 0.0;
            continue;
        }
        let mut sum = factor.qtb[i];
        for j in i + 1..n {
            sum -= factor.r[i][j] * x[j];
        }
        x[i] = sum / factor.r[i][i];
    }
    Ok(x)
}

/// Transpose predictor-major columns (`x[predictor][observation]`) into a row-major design.
pub fn columns_to_rows(x: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = x.len();
    let n = x.first().map_or(0, |c| c.len());
    let mut rows = vec![vec![0.0; k]; n];
    for (j, col) in x.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            rows[i][j] = v;
        }
    }
    rows
}

/// Compute residuals from regression
///
/// # Arguments
/// * `x` - Predictors in predictor-major format (k predictors × n observations)
/// * `y` - Response vector (n observations)
/// * `coeffs` - Regression coefficients (k values)
pub fn compute_residuals(x: &[Vec<f64>], y: &[f64], coeffs: &[f64]) -> Vec<f64> {
    debug_assert_eq!(coeffs.len(), x.len(), "coefficients length must match number of predictors");

    (0..y.len())
        .map(|t| {
            let fitted: f64 = coeffs.iter().enumerate().map(|(i, c)| c * x[i][t]).sum();
            y[t] - fitted
        })
        .collect()
}

/// Ordinary least squares fit with classical covariance.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Estimated coefficients, one per predictor column
    pub coefficients: Vec<f64>,
    /// Classical standard errors `sqrt(s² · diag((X'X)⁻¹))`
    pub standard_errors: Vec<f64>,
    /// Residuals `y - Xb`
    pub residuals: Vec<f64>,
    /// Residual sum of squares
    pub ssr: f64,
    /// Centered R² (uncentered when the design has no constant column)
    pub r_squared: f64,
    /// Observations
    pub n_obs: usize,
    /// Predictor columns
    pub n_params: usize,
}

impl OlsFit {
    /// Residual degrees of freedom
    pub fn df_resid(&self) -> usize {
        self.n_obs - self.n_params
    }

    /// Gaussian log-likelihood at the ML variance `ssr / n`
    pub fn log_likelihood(&self) -> f64 {
        let n = self.n_obs as f64;
        -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0)
    }

    /// Akaike information criterion `-2 llf + 2 k`
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood() + 2.0 * self.n_params as f64
    }

    /// t-statistic of coefficient `idx`
    pub fn t_statistic(&self, idx: usize) -> f64 {
        self.coefficients[idx] / self.standard_errors[idx]
    }
}

/// Fit `y` on predictor-major columns `x` by Householder QR.
///
/// Unlike [`economy_qr_solve`], a rank-deficient design is an error: the
/// callers need well-defined standard errors and degrees of freedom.
pub fn ols_fit(x: &[Vec<f64>], y: &[f64]) -> EcmResult<OlsFit> {
    let k = x.len();
    let n = y.len();
    if k == 0 {
        return Err(EcmAnalysisError::numerical("design has no columns", "ols_fit"));
    }
    if n <= k {
        return Err(EcmAnalysisError::InsufficientData {
            required: k + 1,
            actual: n,
        });
    }
    for (i, col) in x.iter().enumerate() {
        if col.len() != n {
            return Err(EcmAnalysisError::numerical(
                format!("Predictor column {} has length {} but expected {}", i, col.len(), n),
                "ols_fit",
            ));
        }
    }

    let design = columns_to_rows(x);
    let factor = householder_factor(&design, y, "ols_fit")?;
    let r = &factor.r;

    let max_diag = (0..k).map(|i| r[i][i].abs()).fold(0.0, f64::max);
    for i in 0..k {
        if r[i][i].abs() < factor.rank_tol || r[i][i].abs() < 1e-10 * max_diag {
            return Err(EcmAnalysisError::numerical(
                format!("rank-deficient design at column {}", i),
                "ols_fit",
            ));
        }
    }

    let mut coefficients = vec![0.0; k];
    for i in (0..k).rev() {
        let mut sum = factor.qtb[i];
        for j in i + 1..k {
            sum -= r[i][j] * coefficients[j];
        }
        coefficients[i] = sum / r[i][i];
    }

    let residuals = compute_residuals(x, y, &coefficients);
    let ssr: f64 = residuals.iter().map(|e| e * e).sum();

    let has_constant = x.iter().any(|col| {
        let first = col[0];
        first != 0.0 && col.iter().all(|&v| (v - first).abs() < 1e-12)
    });
    let tss = if has_constant {
        let mean = y.iter().sum::<f64>() / n as f64;
        y.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
    } else {
        y.iter().map(|v| v * v).sum::<f64>()
    };
    let r_squared = if tss > 0.0 { 1.0 - ssr / tss } else { 0.0 };

    // (X'X)^-1 = R^-1 R^-T
    let mut r_inv = vec![vec![0.0; k]; k];
    for col in 0..k {
        for i in (0..=col).rev() {
            let rhs = if i == col { 1.0 } else { 0.0 };
            let mut sum = rhs;
            for j in i + 1..=col {
                sum -= r[i][j] * r_inv[j][col];
            }
            r_inv[i][col] = sum / r[i][i];
        }
    }
    let sigma2 = ssr / (n - k) as f64;
    let standard_errors = (0..k)
        .map(|i| {
            let diag: f64 = (i..k).map(|j| r_inv[i][j] * r_inv[i][j]).sum();
            (sigma2 * diag).sqrt()
        })
        .collect();

    Ok(OlsFit {
        coefficients,
        standard_errors,
        residuals,
        ssr,
        r_squared,
        n_obs: n,
        n_params: k,
    })
}

/// Lagged copies of `series` as predictor-major columns.
///
/// Column `j` holds `series[t - j - 1]` for `t` in `lags..n`; every column has
/// `n - lags` entries aligned with `series[lags..]`.
pub fn lagged_columns(series: &[f64], lags: usize) -> Vec<Vec<f64>> {
    let n = series.len();
    if lags >= n {
        return vec![Vec::new(); lags];
    }
    (1..=lags)
        .map(|lag| (lags..n).map(|t| series[t - lag]).collect())
        .collect()
}

/// Long-run variance with Bartlett weights `1 - k/(lags+1)`.
///
/// All autocovariances use the denominator `n`, as required by the KPSS statistic.
pub fn bartlett_long_run_variance(residuals: &[f64], lags: usize) -> EcmResult<f64> {
    let n = residuals.len();
    if n < 2 {
        return Err(EcmAnalysisError::InsufficientData {
            required: 2,
            actual: n,
        });
    }

    let mut s_hat: f64 = residuals.iter().map(|r| r * r).sum();
    for k in 1..=lags.min(n - 1) {
        let weight = 1.0 - k as f64 / (lags + 1) as f64;
        let autocov: f64 = (k..n).map(|i| residuals[i] * residuals[i - k]).sum();
        s_hat += 2.0 * weight * autocov;
    }
    Ok(s_hat / n as f64)
}

/// Stack predictor-major columns into a `nalgebra` matrix (observations × columns).
pub fn columns_to_dmatrix(columns: &[Vec<f64>]) -> DMatrix<f64> {
    let ncols = columns.len();
    let nrows = columns.first().map_or(0, |c| c.len());
    DMatrix::from_fn(nrows, ncols, |i, j| columns[j][i])
}

/// Least squares `B` minimizing `||Y - X B||` for matrix responses, via `nalgebra` SVD.
///
/// Returns `None` when the design is numerically rank deficient.
pub fn matrix_least_squares(x: &DMatrix<f64>, y: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if x.ncols() == 0 {
        return Some(DMatrix::zeros(0, y.ncols()));
    }
    if x.nrows() < x.ncols() {
        return None;
    }
    let svd = x.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let tol = max_sv * (x.nrows().max(x.ncols()) as f64) * f64::EPSILON * 100.0;
    if max_sv == 0.0 || svd.singular_values.iter().any(|&s| s <= tol) {
        return None;
    }
    svd.solve(y, tol).ok()
}

/// Solve the reduced-rank eigenproblem `|λ S11 - S10 S00⁻¹ S01| = 0` of two
/// residual matrices (rows are observations).
///
/// Returns the eigenvalues in decreasing order and the matching eigenvectors
/// as columns, normalized so that `v' S11 v = 1`. `None` when either moment
/// matrix is not positive definite.
pub fn reduced_rank_eigen(r0: &DMatrix<f64>, r1: &DMatrix<f64>) -> Option<(Vec<f64>, DMatrix<f64>)> {
    let t = r0.nrows() as f64;
    if r0.nrows() != r1.nrows() || r0.nrows() == 0 {
        return None;
    }
    let s00 = r0.transpose() * r0 / t;
    let s11 = r1.transpose() * r1 / t;
    let s01 = r0.transpose() * r1 / t;

    let s00_chol = s00.cholesky()?;
    let m = s01.transpose() * s00_chol.solve(&s01);

    let s11_chol = s11.cholesky()?;
    let l_inv = s11_chol.l().try_inverse()?;
    let c = &l_inv * m * l_inv.transpose();
    let c = (&c + c.transpose()) * 0.5;

    let dim = c.nrows();
    let eigen = c.symmetric_eigen();
    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| float_total_cmp(&eigen.eigenvalues[b], &eigen.eigenvalues[a]));

    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let w = DMatrix::from_fn(dim, order.len(), |i, j| eigen.eigenvectors[(i, order[j])]);
    let vectors = l_inv.transpose() * w;
    Some((values, vectors))
}

/// Subtract the column means.
pub fn demean_columns(m: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for mut col in out.column_iter_mut() {
        let mean = col.mean();
        col.add_scalar_mut(-mean);
    }
    out
}

/// Residuals of regressing every column of `y` on `x`; `y` itself when `x` is empty.
pub fn residualize(y: &DMatrix<f64>, x: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if x.ncols() == 0 {
        return Some(y.clone());
    }
    let b = matrix_least_squares(x, y)?;
    Some(y - x * b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_economy_qr_solve_exact_system() {
        // y = 1 + 2x
        let a = vec![
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![1.0, 2.0],
            vec![1.0, 3.0],
        ];
        let b = vec![1.0, 3.0, 5.0, 7.0];
        let x = economy_qr_solve(&a, &b).unwrap();
        assert_approx_eq!(x[0], 1.0, 1e-10);
        assert_approx_eq!(x[1], 2.0, 1e-10);
    }

    #[test]
    fn test_economy_qr_rejects_bad_input() {
        assert!(economy_qr_solve(&[], &[]).is_err());
        let ragged = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(economy_qr_solve(&ragged, &[1.0, 2.0]).is_err());
        let a = vec![vec![1.0, f64::NAN], vec![1.0, 2.0], vec![1.0, 3.0]];
        assert!(economy_qr_solve(&a, &[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_ols_fit_standard_errors() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 2.0 + 0.5 * v + if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        let fit = ols_fit(&[vec![1.0; 20], x.clone()], &y).unwrap();
        assert_approx_eq!(fit.coefficients[1], 0.5, 0.01);
        assert_eq!(fit.df_resid(), 18);
        assert!(fit.r_squared > 0.95 && fit.r_squared <= 1.0);

        // Compare slope SE with the closed form s / sqrt(Sxx)
        let mean_x = x.iter().sum::<f64>() / 20.0;
        let sxx: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
        let s = (fit.ssr / 18.0).sqrt();
        assert_approx_eq!(fit.standard_errors[1], s / sxx.sqrt(), 1e-10);
        assert!(fit.log_likelihood().is_finite());
    }

    #[test]
    fn test_ols_fit_detects_collinearity() {
        let x1: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let x2: Vec<f64> = x1.iter().map(|v| 2.0 * v).collect();
        let y: Vec<f64> = x1.iter().map(|v| v + 1.0).collect();
        assert!(ols_fit(&[vec![1.0; 10], x1, x2], &y).is_err());
    }

    #[test]
    fn test_ols_fit_insufficient_rows() {
        match ols_fit(&[vec![1.0, 1.0], vec![0.0, 1.0]], &[1.0, 2.0]) {
            Err(EcmAnalysisError::InsufficientData { required, actual }) => {
                assert_eq!(required, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_lagged_columns_alignment() {
        let cols = lagged_columns(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0], vec![2.0, 3.0, 4.0]);
        assert_eq!(cols[1], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_bartlett_long_run_variance_zero_lags_is_mean_square() {
        let e = [1.0, -1.0, 2.0, -2.0];
        assert_approx_eq!(bartlett_long_run_variance(&e, 0).unwrap(), 2.5, 1e-12);
        assert!(bartlett_long_run_variance(&[1.0], 0).is_err());
    }

    #[test]
    fn test_matrix_least_squares() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 3.0, -1.0, 5.0, -2.0, 7.0, -3.0]);
        let b = matrix_least_squares(&x, &y).unwrap();
        assert_approx_eq!(b[(0, 0)], 1.0, 1e-10);
        assert_approx_eq!(b[(1, 0)], 2.0, 1e-10);
        assert_approx_eq!(b[(1, 1)], -1.0, 1e-10);

        let singular = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        assert!(matrix_least_squares(&singular, &y.rows(0, 3).into_owned()).is_none());
    }

    #[test]
    fn test_reduced_rank_eigen_normalization() {
        let r0 = DMatrix::from_fn(40, 2, |i, j| ((i * (j + 3)) as f64 * 0.37).sin());
        let r1 = DMatrix::from_fn(40, 2, |i, j| ((i * (j + 2)) as f64 * 0.53).cos() + 0.5 * r0[(i, j)]);
        let (values, vectors) = reduced_rank_eigen(&r0, &r1).unwrap();
        assert!(values[0] >= values[1]);
        assert!(values.iter().all(|&v| v > -1e-12 && v < 1.0));

        let s11 = r1.transpose() * &r1 / 40.0;
        let gram = vectors.transpose() * s11 * &vectors;
        assert_approx_eq!(gram[(0, 0)], 1.0, 1e-9);
        assert_approx_eq!(gram[(0, 1)], 0.0, 1e-9);
    }

    #[test]
    fn test_demean_and_residualize() {
        let y = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 6.0]);
        let centered = demean_columns(&y);
        assert_approx_eq!(centered.sum(), 0.0, 1e-12);

        let empty = DMatrix::<f64>::zeros(3, 0);
        assert_eq!(residualize(&y, &empty).unwrap(), y);
        let ones = DMatrix::from_element(3, 1, 1.0);
        let resid = residualize(&y, &ones).unwrap();
        assert_approx_eq!(resid[(2, 0)], 3.0, 1e-10);
    }
}
