//! # Market Error-Correction Analysis
//!
//! Error-correction models for commodity price panels from fragmented markets.
//!
//! The crate takes an already-normalized panel of market observations (price,
//! conflict intensity, region, exchange-rate regime), splits it into
//! independent (commodity, regime) groups and, for each group, runs a fixed
//! decision chain:
//!
//! 1. **Stationarity**: ADF/KPSS agreement over the ladder original, diff,
//!    log, log-diff
//! 2. **Cointegration**: Engle-Granger on the selected transformations
//! 3. **Lag and rank**: VAR AIC order selection and the Johansen trace test
//! 4. **VECM**: Johansen maximum-likelihood fit with a restricted constant
//! 5. **Post-estimation**: information criteria, residual diagnostics,
//!    impulse responses, Granger causality and Moran's I across regions
//!
//! Every unavailable number in the output is `None` / `null`; a failing stage
//! ends the chain for its group only.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use market_ecm::{load_panel, EcmPipeline, PipelineConfig, RunDocument, SpatialWeights};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_file("analysis.toml")?;
//!     let weights = Arc::new(SpatialWeights::load(Path::new("weights.json"))?);
//!     let panel = load_panel(Path::new("panel.json"))?;
//!
//!     let pipeline = EcmPipeline::new(config, weights);
//!     let results = pipeline.run(panel);
//!     for result in &results {
//!         println!("{}: {:?}", result.group, result.ecm_status);
//!     }
//!
//!     RunDocument::new(pipeline.config(), results).write_to(Path::new("results.json"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Variants
//!
//! [`ExogenousSpec`] selects the pipeline variant: the price/conflict pair per
//! regime, or the pivoted north/south price pair with or without regional
//! conflict intensity as exogenous regressors.

#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod linear_algebra;
pub mod math_utils;
pub mod panel;
pub mod results;

// Analysis stages
pub mod causality;
pub mod cointegration;
pub mod criteria;
pub mod diagnostics;
pub mod ecm;
pub mod grouping;
pub mod lag_rank;
pub mod spatial;
pub mod stationarity;
pub mod vif;

// Orchestration
pub mod output;
pub mod pipeline;

pub use config::{
    AnalysisSettings, DataSettings, DiagnosticsSettings, ExogenousSpec, ParallelismSettings,
    PipelineConfig,
};
pub use errors::{EcmAnalysisError, EcmResult};
pub use panel::{deduplicate, load_panel, panel_from_json_str, PanelRow};

pub use causality::{CausalityAnalyzer, GrangerCausality};
pub use cointegration::{CointegrationAnalyzer, CointegrationResult};
pub use criteria::{FitMetrics, ModelCriteriaCalculator};
pub use diagnostics::{DiagnosticsRunner, EquationDiagnostics, ResidualSeries};
pub use ecm::{EcmEstimator, EcmFit, ImpulseResponses};
pub use grouping::{AlignedData, GroupKey, GroupPartitioner, MarketGroup};
pub use lag_rank::{LagRankSelection, LagRankSelector};
pub use spatial::{SpatialAutocorrelation, SpatialAutocorrelationAnalyzer, SpatialWeights};
pub use stationarity::{StationarityAnalyzer, StationarityResult, Transformation, TransformationChoice};

pub use output::RunDocument;
pub use pipeline::EcmPipeline;
pub use results::{AnalysisResult, EcmStatus};
