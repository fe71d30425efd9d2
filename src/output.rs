//! JSON run document.
//!
//! `serde_json` writes non-finite floats as `null`, and result maps keyed by
//! integers (Granger lags) come out with string keys.

use crate::config::PipelineConfig;
use crate::errors::{EcmAnalysisError, EcmResult};
use crate::results::AnalysisResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunDocument {
    pub generated_at: DateTime<Utc>,
    pub crate_version: String,
    pub config: PipelineConfig,
    pub groups_analyzed: usize,
    pub results: Vec<AnalysisResult>,
}

impl RunDocument {
    pub fn new(config: &PipelineConfig, results: Vec<AnalysisResult>) -> Self {
        Self {
            generated_at: Utc::now(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            config: config.clone(),
            groups_analyzed: results.len(),
            results,
        }
    }

    pub fn to_json_string(&self) -> EcmResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| EcmAnalysisError::SerializationError {
            format: "JSON".to_string(),
            reason: e.to_string(),
        })
    }

    /// Write the pretty-printed document to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> EcmResult<()> {
        let io_err = |e: std::io::Error| EcmAnalysisError::IoError {
            operation: format!("writing results {}", path.display()),
            source: Some(Arc::new(e)),
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| {
            EcmAnalysisError::SerializationError {
                format: "JSON".to_string(),
                reason: e.to_string(),
            }
        })?;
        writer.flush().map_err(io_err)?;
        log::info!("Wrote {} group results to {}", self.groups_analyzed, path.display());
        Ok(())
    }
}
