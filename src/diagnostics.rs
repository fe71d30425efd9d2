//! Residual diagnostics for fitted error-correction models.
//!
//! Every statistic is computed independently per equation. A statistic that
//! cannot be computed (too few residuals, singular auxiliary regression,
//! degenerate variance) is reported as `None` without affecting the others.

use crate::config::PipelineConfig;
use crate::errors::{EcmAnalysisError, EcmResult};
use crate::linear_algebra::{columns_to_rows, compute_residuals, economy_qr_solve, lagged_columns, ols_fit};
use crate::math_utils::{
    calculate_autocorrelations, calculate_kurtosis, calculate_partial_autocorrelations,
    calculate_skewness, chi_squared_sf, finite_or_none, mean,
};
use nalgebra::DMatrix;
use serde::Serialize;

// ============================================================================
// RESIDUAL SERIES
// ============================================================================

/// Model residuals with a known shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ResidualSeries {
    /// A single residual vector
    Univariate(Vec<f64>),
    /// One residual vector per model equation, all of equal length
    PerEquation {
        names: Vec<String>,
        columns: Vec<Vec<f64>>,
    },
}

impl ResidualSeries {
    /// Build from a `T × k` residual matrix with one named column per equation.
    pub fn from_matrix(names: &[String], residuals: &DMatrix<f64>) -> Self {
        let columns: Vec<Vec<f64>> = residuals
            .column_iter()
            .map(|c| c.iter().copied().collect())
            .collect();
        if columns.len() == 1 {
            return ResidualSeries::Univariate(columns.into_iter().next().unwrap_or_default());
        }
        let names = (0..columns.len())
            .map(|i| names.get(i).cloned().unwrap_or_else(|| format!("eq{}", i)))
            .collect();
        ResidualSeries::PerEquation { names, columns }
    }

    /// Residuals per equation
    pub fn n_obs(&self) -> usize {
        match self {
            ResidualSeries::Univariate(v) => v.len(),
            ResidualSeries::PerEquation { columns, .. } => columns.first().map_or(0, |c| c.len()),
        }
    }

    pub fn n_equations(&self) -> usize {
        match self {
            ResidualSeries::Univariate(_) => 1,
            ResidualSeries::PerEquation { columns, .. } => columns.len(),
        }
    }

    /// Iterate `(equation name, residuals)` uniformly over both shapes.
    pub fn equations(&self) -> Box<dyn Iterator<Item = (&str, &[f64])> + '_> {
        match self {
            ResidualSeries::Univariate(v) => Box::new(std::iter::once(("residual", v.as_slice()))),
            ResidualSeries::PerEquation { names, columns } => Box::new(
                names
                    .iter()
                    .map(String::as_str)
                    .zip(columns.iter().map(Vec::as_slice)),
            ),
        }
    }

    /// Residuals of equation `idx`
    pub fn equation(&self, idx: usize) -> Option<&[f64]> {
        match self {
            ResidualSeries::Univariate(v) => (idx == 0).then_some(v.as_slice()),
            ResidualSeries::PerEquation { columns, .. } => columns.get(idx).map(Vec::as_slice),
        }
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Lagrange-multiplier style test with a chi-squared reference distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChiSquaredTest {
    pub statistic: f64,
    pub p_value: f64,
    pub df: usize,
}

/// Jarque-Bera normality test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JarqueBera {
    pub statistic: f64,
    pub p_value: f64,
    pub skewness: f64,
    /// Non-excess kurtosis (3 for a normal)
    pub kurtosis: f64,
}

/// Every diagnostic for one equation; unavailable statistics are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquationDiagnostics {
    pub equation: String,
    pub n_obs: usize,
    pub breusch_godfrey: Option<ChiSquaredTest>,
    pub arch_lm: Option<ChiSquaredTest>,
    pub jarque_bera: Option<JarqueBera>,
    pub durbin_watson: Option<f64>,
    pub ljung_box: Option<ChiSquaredTest>,
    pub white: Option<ChiSquaredTest>,
    pub acf: Option<Vec<f64>>,
    pub pacf: Option<Vec<f64>>,
}

fn unavailable(test_name: &str, reason: impl Into<String>) -> EcmAnalysisError {
    EcmAnalysisError::DiagnosticUnavailable {
        test_name: test_name.to_string(),
        reason: reason.into(),
    }
}

fn chi_squared_test(statistic: f64, df: usize) -> EcmResult<ChiSquaredTest> {
    Ok(ChiSquaredTest {
        statistic,
        p_value: chi_squared_sf(statistic, df as f64)?,
        df,
    })
}

/// Centered R² of an auxiliary regression that tolerates collinear columns
/// (dependent columns get a zero coefficient). The first column must be the constant.
fn auxiliary_r_squared(columns: &[Vec<f64>], y: &[f64], test_name: &str) -> EcmResult<f64> {
    if y.len() <= columns.len() {
        return Err(unavailable(
            test_name,
            format!("{} observations for {} regressors", y.len(), columns.len()),
        ));
    }
    let coefficients = economy_qr_solve(&columns_to_rows(columns), y)?;
    let residuals = compute_residuals(columns, y, &coefficients);
    let ssr: f64 = residuals.iter().map(|e| e * e).sum();
    let m = mean(y);
    let tss: f64 = y.iter().map(|v| (v - m).powi(2)).sum();
    if tss <= 0.0 {
        return Err(unavailable(test_name, "constant auxiliary response"));
    }
    Ok(1.0 - ssr / tss)
}

fn is_constant_column(col: &[f64]) -> bool {
    col.first()
        .map_or(false, |&first| col.iter().all(|&v| (v - first).abs() < 1e-12))
}

// ============================================================================
// INDIVIDUAL TESTS
// ============================================================================

/// Breusch-Godfrey LM test: `n·R²` of `e_t` on the design and `lags` lagged
/// residuals (pre-sample lags set to zero), `χ²(lags)`.
pub fn breusch_godfrey(residuals: &[f64], design: &[Vec<f64>], lags: usize) -> EcmResult<ChiSquaredTest> {
    let n = residuals.len();
    if lags == 0 || n <= lags + 1 {
        return Err(unavailable("breusch_godfrey", format!("{} residuals for {} lags", n, lags)));
    }
    let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];
    columns.extend(
        design
            .iter()
            .filter(|c| c.len() == n && !is_constant_column(c))
            .cloned(),
    );
    for lag in 1..=lags {
        columns.push((0..n).map(|t| if t >= lag { residuals[t - lag] } else { 0.0 }).collect());
    }
    let r_squared = auxiliary_r_squared(&columns, residuals, "breusch_godfrey")?;
    chi_squared_test(n as f64 * r_squared, lags)
}

/// Engle's ARCH-LM test: `(n-q)·R²` of `e²_t` on a constant and `q` lags of `e²`.
pub fn arch_lm(residuals: &[f64], lags: usize) -> EcmResult<ChiSquaredTest> {
    let n = residuals.len();
    if lags == 0 || n <= 2 * lags + 1 {
        return Err(unavailable("arch_lm", format!("{} residuals for {} lags", n, lags)));
    }
    let squared: Vec<f64> = residuals.iter().map(|e| e * e).collect();
    let nobs = n - lags;
    let mut columns = vec![vec![1.0; nobs]];
    columns.extend(lagged_columns(&squared, lags));
    let fit = ols_fit(&columns, &squared[lags..])?;
    chi_squared_test(nobs as f64 * fit.r_squared, lags)
}

/// Jarque-Bera normality test, `χ²(2)`.
pub fn jarque_bera(residuals: &[f64]) -> EcmResult<JarqueBera> {
    let n = residuals.len();
    if n < 3 {
        return Err(unavailable("jarque_bera", format!("{} residuals", n)));
    }
    let m = mean(residuals);
    if residuals.iter().all(|e| (e - m).abs() < 1e-14) {
        return Err(unavailable("jarque_bera", "zero variance"));
    }
    let skewness = calculate_skewness(residuals);
    let kurtosis = calculate_kurtosis(residuals);
    let statistic = n as f64 / 6.0 * (skewness.powi(2) + (kurtosis - 3.0).powi(2) / 4.0);
    Ok(JarqueBera {
        statistic,
        p_value: chi_squared_sf(statistic, 2.0)?,
        skewness,
        kurtosis,
    })
}

/// Durbin-Watson statistic `Σ(Δe)² / Σe²`, in [0, 4].
pub fn durbin_watson(residuals: &[f64]) -> EcmResult<f64> {
    let denom: f64 = residuals.iter().map(|e| e * e).sum();
    if residuals.is_empty() || denom <= 0.0 {
        return Err(unavailable("durbin_watson", "zero residual sum of squares"));
    }
    let num: f64 = residuals.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    Ok(num / denom)
}

/// Ljung-Box portmanteau test up to `lags`, `χ²(lags)`.
pub fn ljung_box(residuals: &[f64], lags: usize) -> EcmResult<ChiSquaredTest> {
    let n = residuals.len();
    let lags = lags.min(n.saturating_sub(1));
    if lags == 0 {
        return Err(unavailable("ljung_box", format!("{} residuals", n)));
    }
    let acf = calculate_autocorrelations(residuals, lags);
    let n_f = n as f64;
    let q = n_f
        * (n_f + 2.0)
        * (1..=lags)
            .map(|k| acf[k] * acf[k] / (n_f - k as f64))
            .sum::<f64>();
    chi_squared_test(q, lags)
}

/// White's heteroskedasticity test: `n·R²` of `e²` on the design, its squares
/// and cross products, `χ²(regressors - 1)`.
///
/// Undefined for a design with a single column.
pub fn white_test(residuals: &[f64], design: &[Vec<f64>]) -> EcmResult<ChiSquaredTest> {
    let n = residuals.len();
    if design.len() <= 1 {
        return Err(unavailable("white", "design has a single column"));
    }
    let regressors: Vec<&Vec<f64>> = design
        .iter()
        .filter(|c| c.len() == n && !is_constant_column(c))
        .collect();
    if regressors.is_empty() {
        return Err(unavailable("white", "no non-constant regressors"));
    }

    let mut columns = vec![vec![1.0; n]];
    for col in &regressors {
        columns.push((*col).clone());
    }
    for i in 0..regressors.len() {
        for j in i..regressors.len() {
            columns.push((0..n).map(|t| regressors[i][t] * regressors[j][t]).collect());
        }
    }
    let squared: Vec<f64> = residuals.iter().map(|e| e * e).collect();
    let r_squared = auxiliary_r_squared(&columns, &squared, "white")?;
    chi_squared_test(n as f64 * r_squared, columns.len() - 1)
}

// ============================================================================
// RUNNER
// ============================================================================

/// Computes the diagnostic set for every equation of a residual series.
pub struct DiagnosticsRunner {
    serial_correlation_lags: usize,
    arch_lags: usize,
    acf_lags: usize,
}

impl DiagnosticsRunner {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            serial_correlation_lags: config.diagnostics.serial_correlation_lags,
            arch_lags: config.diagnostics.arch_lags,
            acf_lags: config.diagnostics.acf_lags,
        }
    }

    fn keep<T>(equation: &str, test: &str, outcome: EcmResult<T>) -> Option<T> {
        match outcome {
            Ok(v) => Some(v),
            Err(e) => {
                log::debug!("{}: {} unavailable: {}", equation, test, e);
                None
            }
        }
    }

    /// Diagnostics for one residual vector against its regressor design
    /// (predictor-major columns, same length as the residuals).
    pub fn diagnose(&self, equation: &str, residuals: &[f64], design: &[Vec<f64>]) -> EquationDiagnostics {
        let n = residuals.len();
        let finite = residuals.iter().all(|e| e.is_finite());
        let guard = |test: &str| -> EcmResult<()> {
            if finite {
                Ok(())
            } else {
                Err(unavailable(test, "non-finite residuals"))
            }
        };

        let acf_lags = self.acf_lags.min(n.saturating_sub(1));
        let correlogram_ok = guard("acf").and_then(|_| {
            if n < 3 {
                Err(unavailable("acf", format!("{} residuals", n)))
            } else {
                Ok(())
            }
        });

        EquationDiagnostics {
            equation: equation.to_string(),
            n_obs: n,
            breusch_godfrey: Self::keep(
                equation,
                "breusch_godfrey",
                guard("breusch_godfrey")
                    .and_then(|_| breusch_godfrey(residuals, design, self.serial_correlation_lags)),
            ),
            arch_lm: Self::keep(
                equation,
                "arch_lm",
                guard("arch_lm").and_then(|_| arch_lm(residuals, self.arch_lags)),
            ),
            jarque_bera: Self::keep(
                equation,
                "jarque_bera",
                guard("jarque_bera").and_then(|_| jarque_bera(residuals)),
            ),
            durbin_watson: Self::keep(
                equation,
                "durbin_watson",
                guard("durbin_watson").and_then(|_| durbin_watson(residuals)),
            )
            .and_then(finite_or_none),
            ljung_box: Self::keep(
                equation,
                "ljung_box",
                guard("ljung_box").and_then(|_| ljung_box(residuals, self.serial_correlation_lags)),
            ),
            white: Self::keep(
                equation,
                "white",
                guard("white").and_then(|_| white_test(residuals, design)),
            ),
            acf: Self::keep(
                equation,
                "acf",
                correlogram_ok
                    .clone()
                    .map(|_| calculate_autocorrelations(residuals, acf_lags)),
            ),
            pacf: Self::keep(
                equation,
                "pacf",
                correlogram_ok.and_then(|_| calculate_partial_autocorrelations(residuals, acf_lags)),
            ),
        }
    }

    /// Diagnostics for every equation, in equation order.
    pub fn run(&self, residuals: &ResidualSeries, design: &[Vec<f64>]) -> Vec<EquationDiagnostics> {
        residuals
            .equations()
            .map(|(name, values)| self.diagnose(name, values, design))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    fn runner() -> DiagnosticsRunner {
        DiagnosticsRunner::new(&PipelineConfig::default())
    }

    const KEYS: [&str; 10] = [
        "equation",
        "n_obs",
        "breusch_godfrey",
        "arch_lm",
        "jarque_bera",
        "durbin_watson",
        "ljung_box",
        "white",
        "acf",
        "pacf",
    ];

    #[test]
    fn test_single_residual_keeps_every_key() {
        let diag = runner().diagnose("price", &[0.7], &[vec![1.0]]);
        let value = serde_json::to_value(&diag).unwrap();
        let object = value.as_object().unwrap();
        for key in KEYS {
            assert!(object.contains_key(key), "missing {}", key);
        }
        assert!(diag.breusch_godfrey.is_none());
        assert!(diag.white.is_none());
        assert!(diag.acf.is_none());
        assert_eq!(diag.durbin_watson, Some(0.0));
    }

    #[test]
    fn test_white_noise_diagnostics() {
        let e = noise(300, 42);
        let x: Vec<f64> = noise(300, 43);
        let design = vec![vec![1.0; 300], x];
        let diag = runner().diagnose("eq", &e, &design);

        let dw = diag.durbin_watson.unwrap();
        assert!(dw > 1.5 && dw < 2.5, "dw = {}", dw);
        assert!(diag.breusch_godfrey.unwrap().p_value > 0.001);
        assert!(diag.jarque_bera.unwrap().p_value > 0.001);
        assert_eq!(diag.white.unwrap().df, 2);
        let acf = diag.acf.unwrap();
        assert_eq!(acf.len(), 21);
        assert_approx_eq!(acf[0], 1.0, 1e-12);
        assert_eq!(diag.pacf.unwrap().len(), 21);
    }

    #[test]
    fn test_white_unavailable_for_single_column_design() {
        let e = noise(50, 1);
        let diag = runner().diagnose("eq", &e, &[vec![1.0; 50]]);
        assert!(diag.white.is_none());
        assert!(diag.arch_lm.is_some());
    }

    #[test]
    fn test_serial_correlation_detected() {
        let shocks = noise(400, 9);
        let mut e = vec![0.0; 400];
        for t in 1..400 {
            e[t] = 0.8 * e[t - 1] + shocks[t];
        }
        let bg = breusch_godfrey(&e, &[vec![1.0; 400]], 2).unwrap();
        assert!(bg.p_value < 0.01);
        let lb = ljung_box(&e, 10).unwrap();
        assert!(lb.p_value < 0.01);
        assert!(durbin_watson(&e).unwrap() < 1.0);
    }

    #[test]
    fn test_arch_effect_detected() {
        let z = noise(600, 21);
        let mut e = vec![0.0; 600];
        let mut prev = 0.0_f64;
        for t in 0..600 {
            let sigma2 = 0.2 + 0.7 * prev * prev;
            e[t] = sigma2.sqrt() * z[t];
            prev = e[t];
        }
        assert!(arch_lm(&e, 1).unwrap().p_value < 0.01);
    }

    #[test]
    fn test_residual_series_iteration() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let names = vec!["north".to_string(), "south".to_string()];
        let series = ResidualSeries::from_matrix(&names, &m);
        assert_eq!(series.n_equations(), 2);
        assert_eq!(series.n_obs(), 3);
        let collected: Vec<(&str, &[f64])> = series.equations().collect();
        assert_eq!(collected[1].0, "south");
        assert_eq!(collected[1].1, &[4.0, 5.0, 6.0]);

        let uni = ResidualSeries::Univariate(vec![1.0, 2.0]);
        assert_eq!(uni.equations().count(), 1);
        assert_eq!(uni.equation(0).unwrap().len(), 2);
        assert!(uni.equation(1).is_none());
        assert_eq!(runner().run(&uni, &[]).len(), 1);
    }
}
