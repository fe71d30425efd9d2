//! Error types and validation functions for error-correction analysis.
//!
//! Every stage of the per-group pipeline reports failures through
//! [`EcmAnalysisError`]. Most variants are recoverable at the group boundary:
//! the orchestrator logs them and either drops the group or marks the affected
//! result field as unavailable. Only [`EcmAnalysisError::ConfigurationError`]
//! and input loading failures are fatal for a whole run.

use std::sync::Arc;
use thiserror::Error;

/// Error taxonomy for the analysis pipeline.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum EcmAnalysisError {
    /// Group, pair or aligned series below the minimum size.
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData {
        /// Minimum required data points
        required: usize,
        /// Actual number of data points provided
        actual: usize,
    },

    /// No candidate transformation passed both stationarity tests.
    #[error("No stationary transformation found for {variable}")]
    NoStationaryTransformation {
        /// Variable whose transformation ladder was exhausted
        variable: String,
    },

    /// Engle-Granger was not significant or the Johansen rank came out as zero.
    #[error("No cointegration: {reason}")]
    NoCointegration {
        /// Which test rejected the long-run relation
        reason: String,
    },

    /// The VECM system could not be solved.
    #[error("Numerically singular system (lag_order={lag_order}, rank={rank}, data={rows}x{cols})")]
    NumericalSingularity {
        /// Lag order in differences that was attempted
        lag_order: usize,
        /// Cointegration rank that was attempted
        rank: usize,
        /// Observations in the levels matrix
        rows: usize,
        /// Endogenous variables in the levels matrix
        cols: usize,
    },

    /// A single diagnostic statistic could not be computed.
    #[error("Diagnostic unavailable: {test_name} ({reason})")]
    DiagnosticUnavailable {
        /// Name of the statistic
        test_name: String,
        /// Why it could not be computed
        reason: String,
    },

    /// Missing or invalid configuration section/key.
    #[error("Configuration error at '{key}': {reason}")]
    ConfigurationError {
        /// Dotted path of the offending key
        key: String,
        /// Description of the problem
        reason: String,
    },

    /// Invalid parameter value passed to an analysis routine.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Numerical computation error due to instability or bad input.
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
        /// Operation that failed
        operation: Option<String>,
    },

    /// I/O operation error.
    #[error("I/O operation failed: {operation}")]
    IoError {
        /// I/O operation that failed
        operation: String,
        /// Underlying error if available
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization failed: {format}: {reason}")]
    SerializationError {
        /// Format that failed (JSON, TOML)
        format: String,
        /// Parser or writer message
        reason: String,
    },
}

/// Result type for analysis operations.
pub type EcmResult<T> = Result<T, EcmAnalysisError>;

impl EcmAnalysisError {
    /// Shorthand for a [`EcmAnalysisError::NumericalError`] tagged with its operation.
    pub fn numerical(reason: impl Into<String>, operation: &str) -> Self {
        EcmAnalysisError::NumericalError {
            reason: reason.into(),
            operation: Some(operation.to_string()),
        }
    }

    /// Shorthand for a [`EcmAnalysisError::ConfigurationError`].
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        EcmAnalysisError::ConfigurationError {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error ends the whole run rather than a single group.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EcmAnalysisError::ConfigurationError { .. }
                | EcmAnalysisError::IoError { .. }
                | EcmAnalysisError::SerializationError { .. }
        )
    }
}

impl From<std::io::Error> for EcmAnalysisError {
    fn from(err: std::io::Error) -> Self {
        EcmAnalysisError::IoError {
            operation: err.kind().to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

/// Validates that data has sufficient length for analysis.
///
/// # Example
/// ```rust
/// use market_ecm::errors::validate_data_length;
///
/// let data = vec![1.0, 2.0, 3.0];
/// assert!(validate_data_length(&data, 2, "test").is_ok());
/// assert!(validate_data_length(&data, 5, "test").is_err());
/// ```
pub fn validate_data_length(data: &[f64], min_required: usize, operation: &str) -> EcmResult<()> {
    if data.len() < min_required {
        log::trace!(
            "{}: {} points below minimum {}",
            operation,
            data.len(),
            min_required
        );
        return Err(EcmAnalysisError::InsufficientData {
            required: min_required,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Validates that a parameter is within `[min, max]`.
///
/// ```rust
/// use market_ecm::errors::validate_parameter;
///
/// assert!(validate_parameter(0.05, 0.0, 1.0, "alpha").is_ok());
/// assert!(validate_parameter(1.5, 0.0, 1.0, "alpha").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> EcmResult<()> {
    if value.is_nan() {
        return Err(EcmAnalysisError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "must not be NaN".to_string(),
        });
    }

    if min.is_nan() || max.is_nan() || min > max {
        return Err(EcmAnalysisError::NumericalError {
            reason: format!(
                "Invalid bounds for parameter {}: min={}, max={}",
                name, min, max
            ),
            operation: None,
        });
    }

    if value < min || value > max {
        Err(EcmAnalysisError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates that all values in a slice are finite.
///
/// Returns on the first offending value, naming its index.
pub fn validate_all_finite(data: &[f64], name: &str) -> EcmResult<()> {
    if let Some((i, &value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(EcmAnalysisError::NumericalError {
            reason: format!("{} contains non-finite value at index {}: {}", name, i, value),
            operation: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_data_length_insufficient() {
        let data = vec![1.0, 2.0];
        match validate_data_length(&data, 5, "test_operation") {
            Err(EcmAnalysisError::InsufficientData { required, actual }) => {
                assert_eq!(required, 5);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected InsufficientData error, got {:?}", other),
        }
        assert!(validate_data_length(&data, 2, "exact").is_ok());
    }

    #[test]
    fn test_validate_parameter_bounds() {
        assert!(validate_parameter(0.0, 0.0, 1.0, "p").is_ok());
        assert!(validate_parameter(1.0, 0.0, 1.0, "p").is_ok());

        match validate_parameter(-0.5, 0.0, 1.0, "significance") {
            Err(EcmAnalysisError::InvalidParameter {
                parameter,
                constraint,
                ..
            }) => {
                assert_eq!(parameter, "significance");
                assert_eq!(constraint, "[0, 1]");
            }
            other => panic!("Expected InvalidParameter, got {:?}", other),
        }

        assert!(matches!(
            validate_parameter(f64::NAN, 0.0, 1.0, "p"),
            Err(EcmAnalysisError::InvalidParameter { .. })
        ));
        assert!(matches!(
            validate_parameter(0.5, 1.0, 0.0, "p"),
            Err(EcmAnalysisError::NumericalError { .. })
        ));
    }

    #[test]
    fn test_validate_all_finite_reports_index() {
        assert!(validate_all_finite(&[], "empty").is_ok());
        assert!(validate_all_finite(&[1.0, 2.0], "ok").is_ok());

        match validate_all_finite(&[1.0, 2.0, f64::NAN], "prices") {
            Err(EcmAnalysisError::NumericalError { reason, .. }) => {
                assert!(reason.contains("prices"));
                assert!(reason.contains("index 2"));
            }
            other => panic!("Expected NumericalError, got {:?}", other),
        }
    }

    #[test]
    fn test_error_display_and_fatality() {
        let err = EcmAnalysisError::NumericalSingularity {
            lag_order: 2,
            rank: 1,
            rows: 30,
            cols: 2,
        };
        let text = err.to_string();
        assert!(text.contains("lag_order=2"));
        assert!(text.contains("30x2"));
        assert!(!err.is_fatal());

        let cfg = EcmAnalysisError::config("analysis.lag_periods", "missing");
        assert!(cfg.is_fatal());
        assert!(cfg.to_string().contains("analysis.lag_periods"));
    }
}
