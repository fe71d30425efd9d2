//! Spatial autocorrelation of model residuals across market regions.
//!
//! Residuals are mapped to regions by comparing each region's own first
//! differences with the group-level fitted differences, then tested with the
//! global Moran's I under row-standardized contiguity weights. A permutation
//! reference distribution gives the p-value and z-score.

use crate::config::PipelineConfig;
use crate::ecm::EcmFit;
use crate::errors::{EcmAnalysisError, EcmResult};
use crate::grouping::GroupVariable;
use crate::math_utils::{calculate_variance, finite_or_none, mean};
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// WEIGHTS
// ============================================================================

/// Contiguity neighbors per region, loaded once and shared read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialWeights {
    neighbors: BTreeMap<String, BTreeSet<String>>,
}

impl SpatialWeights {
    pub fn new(neighbors: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { neighbors }
    }

    /// Parse a JSON object mapping each region to a list of neighbors.
    ///
    /// ```rust
    /// use market_ecm::spatial::SpatialWeights;
    ///
    /// let w = SpatialWeights::from_json_str(r#"{"Aden": ["Lahj"], "Lahj": ["Aden"]}"#).unwrap();
    /// assert_eq!(w.len(), 2);
    /// assert!(w.neighbors("Aden").unwrap().contains("Lahj"));
    /// ```
    pub fn from_json_str(json: &str) -> EcmResult<Self> {
        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_str(json).map_err(|e| EcmAnalysisError::SerializationError {
                format: "JSON".to_string(),
                reason: e.to_string(),
            })?;
        let neighbors = raw
            .into_iter()
            .map(|(region, list)| {
                let set = list.into_iter().filter(|n| n != &region).collect();
                (region, set)
            })
            .collect();
        Ok(Self { neighbors })
    }

    pub fn load(path: &Path) -> EcmResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| EcmAnalysisError::IoError {
            operation: format!("reading spatial weights {}", path.display()),
            source: Some(Arc::new(e)),
        })?;
        let weights = Self::from_json_str(&contents)?;
        log::info!("Loaded spatial weights for {} regions from {}", weights.len(), path.display());
        Ok(weights)
    }

    pub fn neighbors(&self, region: &str) -> Option<&BTreeSet<String>> {
        self.neighbors.get(region)
    }

    pub fn regions(&self) -> impl Iterator<Item = &String> {
        self.neighbors.keys()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Row-standardized weight rows over `regions` (kept in the given order).
    ///
    /// Neighbors outside `regions` are ignored; a region left without
    /// neighbors gets an all-zero row.
    pub fn row_standardized(&self, regions: &[String]) -> Vec<Vec<f64>> {
        let index: BTreeMap<&str, usize> = regions
            .iter()
            .enumerate()
            .map(|(i, r)| (r.as_str(), i))
            .collect();
        regions
            .iter()
            .map(|region| {
                let mut row = vec![0.0; regions.len()];
                let linked: Vec<usize> = self
                    .neighbors(region)
                    .into_iter()
                    .flatten()
                    .filter_map(|n| index.get(n.as_str()).copied())
                    .collect();
                if !linked.is_empty() {
                    let w = 1.0 / linked.len() as f64;
                    for j in linked {
                        row[j] = w;
                    }
                }
                row
            })
            .collect()
    }
}

// ============================================================================
// MORAN'S I
// ============================================================================

/// Global Moran's I with its permutation inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoranStatistic {
    pub i: f64,
    pub expected: f64,
    /// Folded permutation p-value `(min(larger, perms - larger) + 1) / (perms + 1)`
    pub p_value: f64,
    /// `(I - mean) / sd` of the permutation distribution; `None` for zero spread
    pub z_score: Option<f64>,
}

fn moran_value(z: &[f64], weights: &[Vec<f64>], s0: f64, denom: f64) -> f64 {
    let n = z.len() as f64;
    let mut cross = 0.0;
    for (i, row) in weights.iter().enumerate() {
        for (j, &w) in row.iter().enumerate() {
            if w != 0.0 {
                cross += w * z[i] * z[j];
            }
        }
    }
    n / s0 * cross / denom
}

/// Moran's I of `values` under `weights`, with `permutations` random relabelings.
///
/// `None` below two values, for zero total weight and for zero variance.
pub fn morans_i(
    values: &[f64],
    weights: &[Vec<f64>],
    permutations: usize,
    rng: &mut ChaCha8Rng,
) -> Option<MoranStatistic> {
    let n = values.len();
    if n < 2 || weights.len() != n {
        return None;
    }
    let s0: f64 = weights.iter().flatten().sum();
    if s0 <= 0.0 {
        return None;
    }
    let m = mean(values);
    let mut z: Vec<f64> = values.iter().map(|v| v - m).collect();
    let denom: f64 = z.iter().map(|v| v * v).sum();
    if denom <= 1e-14 {
        return None;
    }

    let i = moran_value(&z, weights, s0, denom);
    let expected = -1.0 / (n as f64 - 1.0);

    let mut simulated = Vec::with_capacity(permutations);
    for _ in 0..permutations {
        z.shuffle(rng);
        simulated.push(moran_value(&z, weights, s0, denom));
    }

    let (p_value, z_score) = if simulated.is_empty() {
        (1.0, None)
    } else {
        let larger = simulated.iter().filter(|&&s| s >= i).count();
        let folded = larger.min(permutations - larger);
        let p = (folded + 1) as f64 / (permutations + 1) as f64;
        let sim_mean = mean(&simulated);
        let sd = calculate_variance(&simulated).sqrt();
        let z_score = if sd > 0.0 {
            finite_or_none((i - sim_mean) / sd)
        } else {
            None
        };
        (p, z_score)
    };

    Some(MoranStatistic {
        i,
        expected,
        p_value,
        z_score,
    })
}

// ============================================================================
// ANALYZER
// ============================================================================

/// Moran's I of one equation's regional residuals; every statistic is `None`
/// when unavailable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialAutocorrelation {
    pub equation: String,
    /// Regions entering the statistic
    pub n_regions: usize,
    pub moran_i: Option<f64>,
    pub expected_i: Option<f64>,
    pub p_value: Option<f64>,
    pub z_score: Option<f64>,
    pub permutations: usize,
    /// Mean residual per region; `None` for regions without usable observations
    pub region_residuals: BTreeMap<String, Option<f64>>,
}

/// Mean over the fit dates of (regional Δvalue − fitted Δvalue) for every region of `variable`.
///
/// `dates` are the aligned dates the model was estimated on; the fit covers
/// their tail.
pub fn regional_residuals(
    variable: &GroupVariable,
    fit: &EcmFit,
    equation: usize,
    dates: &[NaiveDate],
) -> BTreeMap<String, Option<f64>> {
    let offset = dates.len().saturating_sub(fit.n_obs());
    variable
        .regional
        .iter()
        .map(|(region, series)| {
            let gaps: Vec<f64> = (0..fit.n_obs())
                .filter_map(|t| {
                    let idx = offset + t;
                    if idx == 0 {
                        return None;
                    }
                    let now = series.get(&dates[idx])?;
                    let before = series.get(&dates[idx - 1])?;
                    let gap = (now - before) - fit.fitted[(t, equation)];
                    gap.is_finite().then_some(gap)
                })
                .collect();
            let value = if gaps.is_empty() { None } else { finite_or_none(mean(&gaps)) };
            (region.clone(), value)
        })
        .collect()
}

/// Tests the fitted model's residuals for spatial clustering.
pub struct SpatialAutocorrelationAnalyzer {
    weights: Arc<SpatialWeights>,
    permutations: usize,
    seed: u64,
}

impl SpatialAutocorrelationAnalyzer {
    pub fn new(config: &PipelineConfig, weights: Arc<SpatialWeights>) -> Self {
        Self {
            weights,
            permutations: config.analysis.moran_permutations,
            seed: config.analysis.random_seed,
        }
    }

    /// Moran's I for an explicit region → residual map.
    pub fn from_region_values(
        &self,
        equation: &str,
        region_residuals: BTreeMap<String, Option<f64>>,
        rng: &mut ChaCha8Rng,
    ) -> SpatialAutocorrelation {
        let regions: Vec<String> = region_residuals
            .iter()
            .filter(|(region, value)| value.is_some() && self.weights.neighbors(region).is_some())
            .map(|(region, _)| region.clone())
            .collect();
        let values: Vec<f64> = regions
            .iter()
            .filter_map(|r| region_residuals.get(r).copied().flatten())
            .collect();

        let statistic = if self.weights.is_empty() {
            None
        } else {
            morans_i(&values, &self.weights.row_standardized(&regions), self.permutations, rng)
        };
        if statistic.is_none() {
            log::debug!(
                "{}: Moran's I unavailable ({} usable regions)",
                equation,
                regions.len()
            );
        }

        SpatialAutocorrelation {
            equation: equation.to_string(),
            n_regions: regions.len(),
            moran_i: statistic.and_then(|s| finite_or_none(s.i)),
            expected_i: statistic.and_then(|s| finite_or_none(s.expected)),
            p_value: statistic.map(|s| s.p_value),
            z_score: statistic.and_then(|s| s.z_score),
            permutations: self.permutations,
            region_residuals,
        }
    }

    /// One result per fitted equation, in equation order.
    pub fn analyze(
        &self,
        variables: &[GroupVariable],
        fit: &EcmFit,
        dates: &[NaiveDate],
    ) -> Vec<SpatialAutocorrelation> {
        variables
            .iter()
            .take(fit.n_equations())
            .enumerate()
            .map(|(eq, variable)| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(eq as u64));
                let residuals = regional_residuals(variable, fit, eq, dates);
                self.from_region_values(&variable.name, residuals, &mut rng)
            })
            .collect()
    }
}
