//! # Per-Group Orchestration
//!
//! [`EcmPipeline`] runs the full decision chain for every market group:
//! stationarity, Engle-Granger cointegration, lag/rank selection, VECM fit,
//! then criteria, diagnostics, impulse responses, Granger causality and
//! spatial autocorrelation.
//!
//! Groups are independent. With the `parallel` feature they are analysed on a
//! dedicated rayon pool; each task reads its own group and the shared
//! [`SpatialWeights`] and hands its result back through the collect. A group
//! whose analysis panics is logged and left out of the output.

use crate::causality::CausalityAnalyzer;
use crate::cointegration::CointegrationAnalyzer;
use crate::config::PipelineConfig;
use crate::criteria::ModelCriteriaCalculator;
use crate::diagnostics::DiagnosticsRunner;
use crate::ecm::EcmEstimator;
use crate::errors::EcmAnalysisError;
use crate::grouping::{GroupPartitioner, MarketGroup};
use crate::lag_rank::LagRankSelector;
use crate::panel::{deduplicate, PanelRow};
use crate::results::{AnalysisResult, EcmStatus};
use crate::spatial::{SpatialAutocorrelationAnalyzer, SpatialWeights};
use crate::stationarity::StationarityAnalyzer;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

fn status_for(err: &EcmAnalysisError) -> EcmStatus {
    match err {
        EcmAnalysisError::NoCointegration { .. } => EcmStatus::ZeroRank,
        EcmAnalysisError::NumericalSingularity { .. } => EcmStatus::Singular,
        EcmAnalysisError::InsufficientData { .. } => EcmStatus::InsufficientData,
        _ => EcmStatus::Failed,
    }
}

/// Runs every analysis stage over a panel.
pub struct EcmPipeline {
    config: PipelineConfig,
    stationarity: StationarityAnalyzer,
    cointegration: CointegrationAnalyzer,
    lag_rank: LagRankSelector,
    estimator: EcmEstimator,
    criteria: ModelCriteriaCalculator,
    diagnostics: DiagnosticsRunner,
    causality: CausalityAnalyzer,
    spatial: SpatialAutocorrelationAnalyzer,
}

impl EcmPipeline {
    /// Build every stage from one validated configuration.
    pub fn new(config: PipelineConfig, weights: Arc<SpatialWeights>) -> Self {
        Self {
            stationarity: StationarityAnalyzer::new(&config),
            cointegration: CointegrationAnalyzer::new(&config),
            lag_rank: LagRankSelector::new(&config),
            estimator: EcmEstimator::new(&config),
            criteria: ModelCriteriaCalculator::new(),
            diagnostics: DiagnosticsRunner::new(&config),
            causality: CausalityAnalyzer::new(&config),
            spatial: SpatialAutocorrelationAnalyzer::new(&config, weights),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Full analysis of one group.
    ///
    /// `None` when the group cannot be tested for cointegration; it is then
    /// skipped with a warning. Past that point a stage that stops the chain
    /// records its reason in [`AnalysisResult::ecm_status`] and leaves later
    /// fields unavailable.
    pub fn analyze_group(&self, group: &MarketGroup) -> Option<AnalysisResult> {
        let mut data = group.aligned();
        let names = group.endogenous_names();
        let mut result = AnalysisResult::new(
            &group.key,
            self.config.analysis.exogenous_spec,
            data.dates.len(),
        );

        for variable in &group.endogenous {
            let outcome = self.stationarity.analyze(&variable.name, &variable.series);
            result.stationarity.insert(variable.name.clone(), outcome);
        }

        // Engle-Granger on the selected transformations gates the ECM
        let pair = names
            .first()
            .zip(names.get(1))
            .and_then(|(y, x)| result.stationarity.get(y).zip(result.stationarity.get(x)));
        let Some((y_stat, x_stat)) = pair else {
            log::warn!("{}: group needs two endogenous variables, skipped", group.key);
            return None;
        };
        let coint = match self.cointegration.analyze(y_stat, x_stat) {
            Ok(coint) => coint,
            Err(e) => {
                log::warn!("{}: cointegration test failed, group skipped: {}", group.key, e);
                return None;
            }
        };
        let cointegrated = coint.cointegrated;
        let p_value = coint.p_value;
        result.cointegration = Some(coint);
        if !cointegrated {
            log::info!("{}: not cointegrated (p = {:.4}), ECM skipped", group.key, p_value);
            result.stop(
                EcmStatus::NotCointegrated,
                format!("Engle-Granger p-value {:.4}", p_value),
            );
            return Some(result);
        }

        let screen = self.estimator.screen_exogenous(std::mem::take(&mut data.exogenous));
        data.exogenous = screen.kept;
        result.dropped_exogenous = screen.dropped;
        let exog_columns: Vec<Vec<f64>> = data.exogenous.iter().map(|(_, c)| c.clone()).collect();

        let selection = match self.lag_rank.select(&data.endogenous, &exog_columns) {
            Ok(selection) => selection,
            Err(e) => {
                self.log_stop(group, &e);
                result.stop(status_for(&e), e.to_string());
                return Some(result);
            }
        };
        result.lag_order = Some(selection.lag_order);
        result.aic_lag_order = selection.aic_lag_order;
        result.coint_rank = Some(selection.coint_rank);
        result.johansen = Some(selection.johansen.clone());

        let fit = match self
            .estimator
            .estimate(&data, &names, selection.lag_order, selection.coint_rank)
        {
            Ok(fit) => fit,
            Err(e) => {
                self.log_stop(group, &e);
                result.stop(status_for(&e), e.to_string());
                return Some(result);
            }
        };

        result.ecm_status = EcmStatus::Estimated;
        result.fit_metrics = Some(self.criteria.calculate(&fit));
        result.model = Some(fit.summary());
        result.diagnostics = self.diagnostics.run(&fit.residuals, &fit.design);
        result.irf = Some(self.estimator.impulse_responses(&fit));
        result.granger_causality = self.causality.analyze(&data, &names);
        result.spatial_autocorrelation = self.spatial.analyze(&group.endogenous, &fit, &data.dates);

        log::debug!(
            "{}: VECM lag {} rank {} on {} observations",
            group.key,
            fit.lag_order,
            fit.coint_rank,
            fit.n_obs()
        );
        Some(result)
    }

    fn log_stop(&self, group: &MarketGroup, err: &EcmAnalysisError) {
        match err {
            EcmAnalysisError::NoCointegration { reason } => {
                log::info!("{}: {}, ECM skipped", group.key, reason)
            }
            EcmAnalysisError::NumericalSingularity {
                lag_order,
                rank,
                rows,
                cols,
            } => log::warn!(
                "{}: singular VECM system (lag_order={}, rank={}, data={}x{}), group abandoned",
                group.key,
                lag_order,
                rank,
                rows,
                cols
            ),
            other => log::warn!("{}: ECM stage failed: {}", group.key, other),
        }
    }

    /// [`Self::analyze_group`] with panics contained; `None` when skipped or panicked.
    fn analyze_guarded(&self, group: &MarketGroup) -> Option<AnalysisResult> {
        match catch_unwind(AssertUnwindSafe(|| self.analyze_group(group))) {
            Ok(result) => result,
            Err(_) => {
                log::error!("{}: analysis panicked, group omitted", group.key);
                None
            }
        }
    }

    fn analyze_sequential(&self, groups: &[MarketGroup]) -> Vec<AnalysisResult> {
        groups.iter().filter_map(|g| self.analyze_guarded(g)).collect()
    }

    #[cfg(feature = "parallel")]
    fn analyze_all(&self, groups: &[MarketGroup]) -> Vec<AnalysisResult> {
        use rayon::prelude::*;

        let workers = self.config.parallelism.worker_count();
        if workers <= 1 || groups.len() <= 1 {
            return self.analyze_sequential(groups);
        }
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                log::info!("Analysing {} groups on {} workers", groups.len(), workers);
                pool.install(|| {
                    groups
                        .par_iter()
                        .filter_map(|g| self.analyze_guarded(g))
                        .collect()
                })
            }
            Err(e) => {
                log::warn!("Worker pool unavailable ({}), analysing sequentially", e);
                self.analyze_sequential(groups)
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn analyze_all(&self, groups: &[MarketGroup]) -> Vec<AnalysisResult> {
        self.analyze_sequential(groups)
    }

    /// Deduplicate, partition and analyse a panel. Result order is not guaranteed.
    pub fn run(&self, panel: Vec<PanelRow>) -> Vec<AnalysisResult> {
        let rows = deduplicate(panel);
        let groups = GroupPartitioner::new(&self.config).partition(&rows);
        let results = self.analyze_all(&groups);

        let estimated = results.iter().filter(|r| r.is_estimated()).count();
        log::info!(
            "Analysed {} of {} groups ({} with a fitted ECM), variant {}",
            results.len(),
            groups.len(),
            estimated,
            self.config.analysis.exogenous_spec.as_str()
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExogenousSpec;
    use crate::grouping::{GroupKey, GroupVariable};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn variable(name: &str, values: &[f64]) -> GroupVariable {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let series: BTreeMap<NaiveDate, f64> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (start + chrono::Duration::days(7 * i as i64), v))
            .collect();
        let mut regional = BTreeMap::new();
        regional.insert("Sanaa".to_string(), series.clone());
        GroupVariable {
            name: name.to_string(),
            series,
            regional,
        }
    }

    fn pipeline() -> EcmPipeline {
        EcmPipeline::new(PipelineConfig::default(), Arc::new(SpatialWeights::default()))
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&EcmAnalysisError::NoCointegration { reason: String::new() }),
            EcmStatus::ZeroRank
        );
        assert_eq!(
            status_for(&EcmAnalysisError::NumericalSingularity {
                lag_order: 1,
                rank: 1,
                rows: 10,
                cols: 2
            }),
            EcmStatus::Singular
        );
        assert_eq!(status_for(&EcmAnalysisError::numerical("x", "y")), EcmStatus::Failed);
    }

    #[test]
    fn test_unrelated_trends_stop_before_ecm() {
        let a: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.9).sin() * 3.0 + i as f64).collect();
        let b: Vec<f64> = (0..40).map(|i| 5.0 + ((i * i) % 7) as f64).collect();
        let group = MarketGroup {
            key: GroupKey {
                commodity: "wheat".to_string(),
                regime: Some("north".to_string()),
            },
            n_rows: 40,
            endogenous: vec![variable("usdprice", &a), variable("conflict_intensity", &b)],
            exogenous: Vec::new(),
        };
        let result = pipeline().analyze_group(&group).unwrap();
        assert_eq!(result.stationarity.len(), 2);
        assert_eq!(result.n_obs, 40);
        if !result.is_estimated() {
            assert!(result.ecm_message.is_some());
            assert!(result.fit_metrics.is_none());
            assert!(result.diagnostics.is_empty());
        }
    }

    #[test]
    fn test_empty_panel_gives_no_results() {
        let pipeline = EcmPipeline::new(
            PipelineConfig::default().with_exogenous_spec(ExogenousSpec::None),
            Arc::new(SpatialWeights::default()),
        );
        assert!(pipeline.run(Vec::new()).is_empty());
    }
}
