//! # Pipeline Configuration
//!
//! A single [`PipelineConfig`] is built once at startup (from TOML or from the
//! in-code defaults) and handed by reference to every component constructor.
//! Validation happens here, before any group is processed; a missing section or
//! key is a fatal [`EcmAnalysisError::ConfigurationError`].

use crate::errors::{validate_parameter, EcmAnalysisError, EcmResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which pipeline variant to run.
///
/// The variants differ only in which series enter the model and whether the
/// `north`/`south` regimes are analysed separately or pivoted side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExogenousSpec {
    /// Groups per (commodity, regime); endogenous pair is (usdprice, conflict_intensity).
    #[default]
    ConflictIntensity,
    /// Groups per commodity with north/south prices pivoted into an endogenous pair;
    /// regional conflict intensity enters as exogenous regressors.
    CrossRegionPrice,
    /// Pivoted north/south price pair without exogenous regressors.
    None,
}

/// How rows of one commodity are laid out into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegimeLayout {
    /// One group per (commodity, regime)
    Stacked,
    /// One group per commodity, regimes become parallel columns
    Pivoted,
}

impl ExogenousSpec {
    /// Group layout implied by the variant
    pub fn layout(self) -> RegimeLayout {
        match self {
            ExogenousSpec::ConflictIntensity => RegimeLayout::Stacked,
            ExogenousSpec::CrossRegionPrice | ExogenousSpec::None => RegimeLayout::Pivoted,
        }
    }

    /// Whether exogenous regressors are attached to groups
    pub fn uses_exogenous(self) -> bool {
        matches!(self, ExogenousSpec::CrossRegionPrice)
    }

    /// Stable name used in result documents
    pub fn as_str(self) -> &'static str {
        match self {
            ExogenousSpec::ConflictIntensity => "conflict_intensity",
            ExogenousSpec::CrossRegionPrice => "cross_region_price",
            ExogenousSpec::None => "none",
        }
    }
}

/// Thresholds of the statistical decision chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Minimum rows (and common dates) a group needs to be analysed
    pub min_common_dates: usize,
    /// Default / upper bound for the VECM lag order in differences
    pub lag_periods: usize,
    /// Maximum lag considered by VAR order selection
    pub cointegration_max_lags: usize,
    /// Maximum Granger-causality lag
    pub granger_max_lags: usize,
    /// Significance level for the ADF/KPSS agreement rule
    #[serde(default = "default_significance")]
    pub stationarity_significance_level: f64,
    /// Significance level for the Engle-Granger test
    #[serde(default = "default_significance")]
    pub cointegration_significance_level: f64,
    /// Variance inflation factor above which an exogenous regressor is dropped
    #[serde(default = "default_vif_threshold")]
    pub vif_threshold: f64,
    /// Horizon of the impulse responses
    #[serde(default = "default_irf_periods")]
    pub irf_periods: usize,
    /// Permutations for the Moran's I pseudo p-value
    #[serde(default = "default_permutations")]
    pub moran_permutations: usize,
    /// Seed for permutation inference
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    /// Pipeline variant
    #[serde(default)]
    pub exogenous_spec: ExogenousSpec,
}

/// Residual diagnostic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    #[serde(default = "default_test_lags")]
    pub serial_correlation_lags: usize,
    #[serde(default = "default_test_lags")]
    pub arch_lags: usize,
    #[serde(default = "default_acf_lags")]
    pub acf_lags: usize,
}

/// Which slices of the panel are analysed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    /// Commodities to analyse; empty means every commodity in the panel
    pub commodities: Vec<String>,
    /// Exchange-rate regimes to analyse; empty means every regime in the panel
    pub regimes: Vec<String>,
    /// Regime label pivoted into the first price column
    #[serde(default = "default_north")]
    pub north_regime: String,
    /// Regime label pivoted into the second price column
    #[serde(default = "default_south")]
    pub south_regime: String,
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelismSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit pool size; overrides the memory-based estimate
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default = "default_memory_budget")]
    pub memory_budget_mb: usize,
    #[serde(default = "default_worker_memory")]
    pub per_worker_memory_mb: usize,
}

/// Complete configuration of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
    pub data: DataSettings,
    #[serde(default)]
    pub parallelism: ParallelismSettings,
}

fn default_significance() -> f64 {
    0.05
}
fn default_vif_threshold() -> f64 {
    5.0
}
fn default_irf_periods() -> usize {
    10
}
fn default_permutations() -> usize {
    999
}
fn default_seed() -> u64 {
    12345
}
fn default_test_lags() -> usize {
    5
}
fn default_acf_lags() -> usize {
    20
}
fn default_north() -> String {
    "north".to_string()
}
fn default_south() -> String {
    "south".to_string()
}
fn default_true() -> bool {
    true
}
fn default_memory_budget() -> usize {
    4096
}
fn default_worker_memory() -> usize {
    512
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            min_common_dates: 20,
            lag_periods: 2,
            cointegration_max_lags: 4,
            granger_max_lags: 4,
            stationarity_significance_level: default_significance(),
            cointegration_significance_level: default_significance(),
            vif_threshold: default_vif_threshold(),
            irf_periods: default_irf_periods(),
            moran_permutations: default_permutations(),
            random_seed: default_seed(),
            exogenous_spec: ExogenousSpec::default(),
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            serial_correlation_lags: default_test_lags(),
            arch_lags: default_test_lags(),
            acf_lags: default_acf_lags(),
        }
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            commodities: Vec::new(),
            regimes: Vec::new(),
            north_regime: default_north(),
            south_regime: default_south(),
        }
    }
}

impl Default for ParallelismSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: None,
            memory_budget_mb: default_memory_budget(),
            per_worker_memory_mb: default_worker_memory(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisSettings::default(),
            diagnostics: DiagnosticsSettings::default(),
            data: DataSettings::default(),
            parallelism: ParallelismSettings::default(),
        }
    }
}

impl ParallelismSettings {
    /// Pool size: explicit `max_workers`, else memory budget / per-worker cost,
    /// capped by the CPU count. Never zero.
    pub fn worker_count(&self) -> usize {
        if !self.enabled {
            return 1;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.max_workers {
            Some(n) => n.max(1),
            None => {
                let by_memory = self.memory_budget_mb / self.per_worker_memory_mb.max(1);
                by_memory.min(cpus).max(1)
            }
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> EcmResult<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| EcmAnalysisError::config("<document>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> EcmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EcmAnalysisError::config(path.display().to_string(), format!("cannot read: {}", e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Same configuration with another pipeline variant
    pub fn with_exogenous_spec(mut self, spec: ExogenousSpec) -> Self {
        self.analysis.exogenous_spec = spec;
        self
    }

    /// Check every threshold before the run starts.
    pub fn validate(&self) -> EcmResult<()> {
        let a = &self.analysis;
        let as_config = |key: &str, err: EcmAnalysisError| EcmAnalysisError::config(key, err.to_string());

        validate_parameter(a.stationarity_significance_level, 1e-6, 0.5, "significance")
            .map_err(|e| as_config("analysis.stationarity_significance_level", e))?;
        validate_parameter(a.cointegration_significance_level, 1e-6, 0.5, "significance")
            .map_err(|e| as_config("analysis.cointegration_significance_level", e))?;

        if a.min_common_dates < 4 {
            return Err(EcmAnalysisError::config(
                "analysis.min_common_dates",
                "must be at least 4",
            ));
        }
        if a.lag_periods == 0 {
            return Err(EcmAnalysisError::config("analysis.lag_periods", "must be >= 1"));
        }
        if a.cointegration_max_lags == 0 {
            return Err(EcmAnalysisError::config(
                "analysis.cointegration_max_lags",
                "must be >= 1",
            ));
        }
        if a.granger_max_lags == 0 {
            return Err(EcmAnalysisError::config("analysis.granger_max_lags", "must be >= 1"));
        }
        if a.vif_threshold.is_nan() || a.vif_threshold <= 1.0 {
            return Err(EcmAnalysisError::config("analysis.vif_threshold", "must be > 1.0"));
        }
        if self.diagnostics.acf_lags == 0
            || self.diagnostics.arch_lags == 0
            || self.diagnostics.serial_correlation_lags == 0
        {
            return Err(EcmAnalysisError::config("diagnostics", "lag counts must be >= 1"));
        }
        if self.parallelism.per_worker_memory_mb == 0 {
            return Err(EcmAnalysisError::config(
                "parallelism.per_worker_memory_mb",
                "must be > 0",
            ));
        }
        if self.data.north_regime == self.data.south_regime {
            return Err(EcmAnalysisError::config(
                "data.south_regime",
                "must differ from data.north_regime",
            ));
        }
        if a.exogenous_spec.layout() == RegimeLayout::Pivoted && !self.data.regimes.is_empty() {
            let listed = |r: &String| self.data.regimes.contains(r);
            if !listed(&self.data.north_regime) || !listed(&self.data.south_regime) {
                return Err(EcmAnalysisError::config(
                    "data.regimes",
                    format!(
                        "variant {} pivots {} and {}; list both or leave empty",
                        a.exogenous_spec.as_str(),
                        self.data.north_regime,
                        self.data.south_regime
                    ),
                ));
            }
        }
        Ok(())
    }
}
