//! Integration tests for error handling and invalid data scenarios
//!
//! These tests validate that fatal problems (configuration, input files) are
//! reported as errors, while per-group problems only shrink the output or
//! leave result fields unavailable.

use chrono::NaiveDate;
use log::{Level, LevelFilter, Log, Metadata, Record};
use market_ecm::errors::EcmAnalysisError;
use market_ecm::*;
use std::sync::{Arc, Mutex};

/// Collects warnings so skipped groups can be checked against the log.
struct WarningLog;

static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static LOGGER: WarningLog = WarningLog;

impl Log for WarningLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            WARNINGS.lock().unwrap().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

fn capture_warnings() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Warn);
    }
}

fn warnings_about(group: &str) -> Vec<String> {
    WARNINGS
        .lock()
        .unwrap()
        .iter()
        .filter(|w| w.contains(group))
        .cloned()
        .collect()
}

fn row(day: i64, commodity: &str, region: &str, regime: &str, price: f64, conflict: Option<f64>) -> PanelRow {
    PanelRow {
        date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(day),
        commodity: commodity.to_string(),
        admin1: region.to_string(),
        exchange_rate_regime: regime.to_string(),
        usdprice: price,
        conflict_intensity: conflict,
        longitude: None,
        latitude: None,
    }
}

fn pipeline(config: PipelineConfig) -> EcmPipeline {
    EcmPipeline::new(config, Arc::new(SpatialWeights::default()))
}

/// Test scenario: a group with fewer observations than the minimum
///
/// The short group is dropped with a warning and absent from the output; other
/// groups are unaffected.
#[test]
fn test_short_group_is_absent() {
    capture_warnings();
    let config = PipelineConfig::default();
    assert_eq!(config.analysis.min_common_dates, 20);

    let mut panel: Vec<PanelRow> = (0..5)
        .map(|d| row(d, "Millet", "Aden", "north", 10.0 + d as f64, Some(1.0)))
        .collect();
    panel.extend((0..40).map(|d| {
        let x = (d as f64 * 0.7).sin() * 5.0 + d as f64 * 0.1;
        row(d, "Sugar", "Aden", "north", 20.0 + x, Some(x))
    }));

    let results = pipeline(config).run(panel);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].commodity, "Sugar");

    let skipped = warnings_about("Millet|north");
    assert!(
        skipped.iter().any(|w| w.contains("Skipping group") && w.contains("below minimum 20")),
        "no skip warning in {:?}",
        skipped
    );
}

/// A constant conflict series makes the cointegrating regression rank
/// deficient, so the group is skipped rather than reported as not cointegrated.
#[test]
fn test_untestable_cointegration_skips_group() {
    capture_warnings();
    let panel: Vec<PanelRow> = (0..40)
        .map(|d| {
            let price = 30.0 + (d as f64 * 0.8).sin() * 4.0 + d as f64 * 0.2;
            row(d, "Sorghum", "Aden", "north", price, Some(0.0))
        })
        .collect();

    let results = pipeline(PipelineConfig::default()).run(panel);
    assert!(results.is_empty(), "unexpected results: {:?}", results.iter().map(|r| &r.ecm_status).collect::<Vec<_>>());

    let skipped = warnings_about("Sorghum|north");
    assert!(
        skipped.iter().any(|w| w.contains("cointegration test failed")),
        "no skip warning in {:?}",
        skipped
    );
}

#[test]
fn test_group_without_common_dates_is_dropped() {
    // 30 price rows, but conflict only on odd days
    let panel: Vec<PanelRow> = (0..30)
        .map(|d| {
            let conflict = if d % 2 == 1 { Some(d as f64) } else { None };
            row(d, "Rice", "Aden", "north", 5.0 + d as f64, conflict)
        })
        .collect();
    let results = pipeline(PipelineConfig::default()).run(panel);
    assert!(results.is_empty());
}

#[test]
fn test_duplicate_rows_are_averaged_before_grouping() {
    let mut panel = Vec::new();
    for d in 0..30 {
        panel.push(row(d, "Wheat", "Aden", "north", 10.0, Some(2.0)));
        panel.push(row(d, "Wheat", "Aden", "north", 20.0, None));
    }
    let rows = deduplicate(panel);
    assert_eq!(rows.len(), 30);
    assert!(rows.iter().all(|r| r.usdprice == 15.0));
    assert!(rows.iter().all(|r| r.conflict_intensity == Some(2.0)));
}

#[test]
fn test_unrelated_series_leave_ecm_fields_unavailable() {
    // Stationary price and deterministic conflict with no shared trend
    let panel: Vec<PanelRow> = (0..60)
        .map(|d| {
            let price = 50.0 + ((d * 7919) % 13) as f64 - 6.0;
            let conflict = ((d * d) % 11) as f64;
            row(d, "Wheat", "Aden", "north", price, Some(conflict))
        })
        .collect();
    let results = pipeline(PipelineConfig::default()).run(panel);
    assert_eq!(results.len(), 1);
    let result = &results[0];
    if !result.is_estimated() {
        assert!(result.ecm_message.is_some());
        assert!(result.fit_metrics.is_none());
        assert!(result.model.is_none());
        assert!(result.irf.is_none());
        assert!(result.diagnostics.is_empty());
        assert!(result.granger_causality.is_empty());
        assert!(result.spatial_autocorrelation.is_empty());
    }
}

#[test]
fn test_configuration_errors_are_fatal() {
    let missing_data = r#"
        [analysis]
        min_common_dates = 20
        lag_periods = 2
        cointegration_max_lags = 4
        granger_max_lags = 4
    "#;
    let err = PipelineConfig::from_toml_str(missing_data).unwrap_err();
    assert!(matches!(err, EcmAnalysisError::ConfigurationError { .. }));
    assert!(err.is_fatal());

    let bad_threshold = r#"
        [analysis]
        min_common_dates = 20
        lag_periods = 2
        cointegration_max_lags = 4
        granger_max_lags = 4
        vif_threshold = 0.5

        [data]
        commodities = []
        regimes = []
    "#;
    let err = PipelineConfig::from_toml_str(bad_threshold).unwrap_err();
    match err {
        EcmAnalysisError::ConfigurationError { key, .. } => assert_eq!(key, "analysis.vif_threshold"),
        other => panic!("Expected ConfigurationError, got {:?}", other),
    }

    let missing_file = PipelineConfig::from_file("/nonexistent/market_ecm.toml").unwrap_err();
    assert!(missing_file.is_fatal());
}

#[test]
fn test_malformed_inputs_are_rejected() {
    assert!(matches!(
        panel_from_json_str(r#"[{"date": "2020-13-45", "commodity": "Wheat"}]"#),
        Err(EcmAnalysisError::SerializationError { .. })
    ));
    assert!(matches!(
        panel_from_json_str(r#"[{"date": "2020-01-01", "commodity": "Wheat", "admin1": "Aden"}]"#),
        Err(EcmAnalysisError::SerializationError { .. })
    ));
    assert!(SpatialWeights::from_json_str(r#"{"Aden": "Lahj"}"#).is_err());

    let err = load_panel(std::path::Path::new("/nonexistent/panel.json")).unwrap_err();
    assert!(matches!(err, EcmAnalysisError::IoError { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_panel_json_with_optional_fields() {
    let json = r#"[
        {"date": "2020-01-01", "commodity": "Wheat", "admin1": "Aden",
         "exchange_rate_regime": "north", "usdprice": 1.5},
        {"date": "2020-01-08T00:00:00Z", "commodity": "Wheat", "admin1": "Aden",
         "exchange_rate_regime": "north", "usdprice": 1.6, "conflict_intensity": 3.0,
         "longitude": 45.0, "latitude": 12.8}
    ]"#;
    let rows = panel_from_json_str(json).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].conflict_intensity, None);
    assert_eq!(rows[1].date, NaiveDate::from_ymd_opt(2020, 1, 8).unwrap());
    assert_eq!(rows[1].latitude, Some(12.8));
}

#[test]
fn test_singular_system_reports_parameters() {
    let estimator = EcmEstimator::new(&PipelineConfig::default());
    let y: Vec<f64> = (0..50).map(|i| (i as f64 * 0.3).sin() * 4.0 + i as f64).collect();
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let data = AlignedData {
        dates: (0..50).map(|i| start + chrono::Duration::days(i)).collect(),
        endogenous: vec![y.clone(), y],
        exogenous: Vec::new(),
    };
    let names = vec!["a".to_string(), "b".to_string()];
    match estimator.estimate(&data, &names, 2, 1) {
        Err(EcmAnalysisError::NumericalSingularity { lag_order, rank, rows, cols }) => {
            assert_eq!((lag_order, rank, rows, cols), (2, 1, 50, 2));
        }
        other => panic!("Expected NumericalSingularity, got {:?}", other.map(|f| f.lag_order)),
    }
}
