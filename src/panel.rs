//! Normalized market panel rows and deduplication.
//!
//! The panel arrives as a JSON array of rows that an upstream collaborator has
//! already normalized. Dates are ISO-8601 (`YYYY-MM-DD` or a full RFC 3339
//! timestamp, of which only the date part is kept).

use crate::errors::{EcmAnalysisError, EcmResult};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One market observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRow {
    /// Observation date
    #[serde(deserialize_with = "deserialize_date")]
    pub date: NaiveDate,
    /// Commodity name
    pub commodity: String,
    /// Market region (admin level 1)
    pub admin1: String,
    /// Exchange-rate regime the market belongs to
    pub exchange_rate_regime: String,
    /// Price in USD
    pub usdprice: f64,
    /// Conflict intensity for the region and date
    #[serde(default)]
    pub conflict_intensity: Option<f64>,
    /// Market longitude
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Market latitude
    #[serde(default)]
    pub latitude: Option<f64>,
}

/// Parse an ISO-8601 date or timestamp into its calendar date.
///
/// ```rust
/// use market_ecm::panel::parse_date;
///
/// assert_eq!(parse_date("2021-03-01").unwrap(), parse_date("2021-03-01T00:00:00Z").unwrap());
/// assert!(parse_date("03/01/2021").is_err());
/// ```
pub fn parse_date(raw: &str) -> EcmResult<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.date_naive());
    }
    if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(ts.date());
    }
    Err(EcmAnalysisError::SerializationError {
        format: "ISO-8601 date".to_string(),
        reason: format!("unparseable date '{}'", raw),
    })
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

/// Parse a panel from a JSON array.
pub fn panel_from_json_str(json: &str) -> EcmResult<Vec<PanelRow>> {
    serde_json::from_str(json).map_err(|e| EcmAnalysisError::SerializationError {
        format: "JSON".to_string(),
        reason: e.to_string(),
    })
}

/// Read and parse a panel file.
pub fn load_panel(path: &Path) -> EcmResult<Vec<PanelRow>> {
    let contents = std::fs::read_to_string(path).map_err(|e| EcmAnalysisError::IoError {
        operation: format!("reading panel {}", path.display()),
        source: Some(Arc::new(e)),
    })?;
    let rows = panel_from_json_str(&contents)?;
    log::info!("Loaded {} panel rows from {}", rows.len(), path.display());
    Ok(rows)
}

#[derive(Default)]
struct OptionalMean {
    sum: f64,
    count: usize,
}

impl OptionalMean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Default)]
struct RowAccumulator {
    price: OptionalMean,
    conflict: OptionalMean,
    longitude: OptionalMean,
    latitude: OptionalMean,
}

/// Collapse rows sharing (date, commodity, admin1, regime).
///
/// Numeric fields are averaged over their non-missing values; the first
/// occurrence supplies everything else and the output order. A key whose
/// prices are all missing keeps a NaN price.
pub fn deduplicate(rows: Vec<PanelRow>) -> Vec<PanelRow> {
    let input_len = rows.len();
    let mut index: HashMap<(NaiveDate, String, String, String), usize> = HashMap::new();
    let mut firsts: Vec<PanelRow> = Vec::new();
    let mut accumulators: Vec<RowAccumulator> = Vec::new();

    for row in rows {
        let key = (
            row.date,
            row.commodity.clone(),
            row.admin1.clone(),
            row.exchange_rate_regime.clone(),
        );
        let slot = *index.entry(key).or_insert_with(|| {
            firsts.push(row.clone());
            accumulators.push(RowAccumulator::default());
            firsts.len() - 1
        });
        let acc = &mut accumulators[slot];
        acc.price.push(Some(row.usdprice));
        acc.conflict.push(row.conflict_intensity);
        acc.longitude.push(row.longitude);
        acc.latitude.push(row.latitude);
    }

    let deduped: Vec<PanelRow> = firsts
        .into_iter()
        .zip(accumulators)
        .map(|(mut row, acc)| {
            row.usdprice = acc.price.value().unwrap_or(f64::NAN);
            row.conflict_intensity = acc.conflict.value();
            row.longitude = acc.longitude.value();
            row.latitude = acc.latitude.value();
            row
        })
        .collect();

    if deduped.len() < input_len {
        log::debug!(
            "Deduplicated panel: {} rows collapsed into {}",
            input_len,
            deduped.len()
        );
    }
    deduped
}
