//! # Per-Group Analysis Results
//!
//! One [`AnalysisResult`] per analysed group. Every downstream field is always
//! present: stages that did not run or could not compute a value leave `None`
//! (serialized as `null`) or an empty collection.

use crate::causality::GrangerCausality;
use crate::cointegration::CointegrationResult;
use crate::config::ExogenousSpec;
use crate::criteria::FitMetrics;
use crate::diagnostics::EquationDiagnostics;
use crate::ecm::{EcmModelSummary, ImpulseResponses};
use crate::grouping::GroupKey;
use crate::lag_rank::JohansenTrace;
use crate::spatial::SpatialAutocorrelation;
use crate::stationarity::StationarityResult;
use crate::vif::DroppedRegressor;
use serde::Serialize;
use std::collections::BTreeMap;

/// How far the error-correction stage got for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EcmStatus {
    /// VECM fitted and downstream analyses run
    Estimated,
    /// Engle-Granger test not significant
    NotCointegrated,
    /// Johansen trace test found rank zero
    ZeroRank,
    /// Singular system during rank selection or estimation
    Singular,
    /// Too few aligned observations for the model
    InsufficientData,
    /// Any other estimation failure
    Failed,
}

/// Complete output for one market group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Display form of the group key
    pub group: String,
    pub commodity: String,
    pub regime: Option<String>,
    pub variant: ExogenousSpec,
    /// Aligned observations across the endogenous variables
    pub n_obs: usize,
    /// Transformation search per variable
    pub stationarity: BTreeMap<String, StationarityResult>,
    pub cointegration: Option<CointegrationResult>,
    pub ecm_status: EcmStatus,
    /// Reason the ECM stage stopped, if it did
    pub ecm_message: Option<String>,
    pub lag_order: Option<usize>,
    /// Order chosen by AIC before clamping
    pub aic_lag_order: Option<usize>,
    pub coint_rank: Option<usize>,
    pub johansen: Option<JohansenTrace>,
    pub fit_metrics: Option<FitMetrics>,
    pub model: Option<EcmModelSummary>,
    /// Exogenous regressors removed by the VIF screen
    pub dropped_exogenous: Vec<DroppedRegressor>,
    /// One entry per equation
    pub diagnostics: Vec<EquationDiagnostics>,
    pub irf: Option<ImpulseResponses>,
    /// Keyed by cause variable
    pub granger_causality: BTreeMap<String, GrangerCausality>,
    /// One entry per equation
    pub spatial_autocorrelation: Vec<SpatialAutocorrelation>,
}

impl AnalysisResult {
    /// Result skeleton with every downstream stage unavailable.
    pub fn new(key: &GroupKey, variant: ExogenousSpec, n_obs: usize) -> Self {
        Self {
            group: key.to_string(),
            commodity: key.commodity.clone(),
            regime: key.regime.clone(),
            variant,
            n_obs,
            stationarity: BTreeMap::new(),
            cointegration: None,
            ecm_status: EcmStatus::NotCointegrated,
            ecm_message: None,
            lag_order: None,
            aic_lag_order: None,
            coint_rank: None,
            johansen: None,
            fit_metrics: None,
            model: None,
            dropped_exogenous: Vec::new(),
            diagnostics: Vec::new(),
            irf: None,
            granger_causality: BTreeMap::new(),
            spatial_autocorrelation: Vec::new(),
        }
    }

    /// Record why the ECM stage stopped.
    pub fn stop(&mut self, status: EcmStatus, message: impl Into<String>) {
        self.ecm_status = status;
        self.ecm_message = Some(message.into());
    }

    pub fn is_estimated(&self) -> bool {
        self.ecm_status == EcmStatus::Estimated
    }
}
