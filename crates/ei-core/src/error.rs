//! Error taxonomy for the economic-impact engine.

use thiserror::Error;

use crate::types::{EstimatorKind, Method};

/// Engine error type.
///
/// Variants map one-to-one onto the failure kinds a caller can act on:
/// fix the request, widen the data, resubmit later, or wait for a method
/// to ship. [`Error::kind`] gives the stable machine-readable code.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid request parameters (e.g. IV without an instrument).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The resolved panel (or estimation sample) is too small to estimate.
    #[error("insufficient data: {0}")]
    DataInsufficient(String),

    /// A warehouse call exceeded its configured deadline.
    #[error("warehouse timed out after {timeout_ms} ms during {operation}")]
    WarehouseTimeout {
        /// Warehouse operation that timed out.
        operation: String,
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The warehouse rejected or could not serve a request.
    #[error("warehouse unavailable: {0}")]
    WarehouseUnavailable(String),

    /// Non-convergence or a singular design matrix inside an estimator.
    #[error("numerical failure in {method}: {message}")]
    Numerical {
        /// Estimator that failed.
        method: EstimatorKind,
        /// Method-specific diagnostic.
        message: String,
    },

    /// Method is part of the enumeration but not enabled in this deployment.
    #[error("method not yet available: {0}")]
    UnsupportedMethod(Method),

    /// Shape/consistency error in kernel inputs.
    #[error("validation error: {0}")]
    Validation(String),

    /// Persistence layer failure.
    #[error("store error: {0}")]
    Store(String),

    /// Record not found for the given tenant.
    #[error("analysis {0} not found")]
    NotFound(String),

    /// Attempted a state transition the record's current status forbids.
    #[error("invalid transition for analysis {id}: {from} -> {to}")]
    InvalidTransition {
        /// Analysis id.
        id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Unexpected failure inside the engine (e.g. a panicking estimator).
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration_error",
            Error::DataInsufficient(_) => "data_insufficient",
            Error::WarehouseTimeout { .. } => "warehouse_timeout",
            Error::WarehouseUnavailable(_) => "warehouse_unavailable",
            Error::Numerical { .. } => "estimation_numerical_error",
            Error::UnsupportedMethod(_) => "unsupported_method",
            Error::Validation(_) => "validation_error",
            Error::Store(_) => "store_error",
            Error::NotFound(_) => "not_found",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Internal(_) => "internal_error",
            Error::Json(_) => "json_error",
            Error::Io(_) => "io_error",
        }
    }

    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WarehouseTimeout { .. } | Error::WarehouseUnavailable(_))
    }

    /// Concise message safe to show on a failed analysis record.
    ///
    /// Internal failures (store, I/O, JSON) collapse to a generic message.
    pub fn user_message(&self) -> String {
        match self {
            Error::Store(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_)
            | Error::InvalidTransition { .. } => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Shorthand for a numerical failure.
    pub fn numerical(method: EstimatorKind, message: impl Into<String>) -> Self {
        Error::Numerical { method, message: message.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct_for_caller_actionable_errors() {
        let errs = [
            Error::Configuration("x".into()),
            Error::DataInsufficient("x".into()),
            Error::WarehouseTimeout { operation: "fetch_panel_rows".into(), timeout_ms: 10 },
            Error::WarehouseUnavailable("x".into()),
            Error::numerical(EstimatorKind::Did, "singular"),
            Error::UnsupportedMethod(Method::Scm),
        ];
        let mut kinds: Vec<_> = errs.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errs.len());
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let e = Error::Store("disk I/O error at page 42".into());
        assert_eq!(e.user_message(), "internal error");
        let e = Error::numerical(EstimatorKind::Iv, "Z'Z singular");
        assert_eq!(e.user_message(), "numerical failure in iv: Z'Z singular");
    }

    #[test]
    fn timeout_is_retryable() {
        let e = Error::WarehouseTimeout { operation: "list_entities".into(), timeout_ms: 5000 };
        assert!(e.is_retryable());
        assert!(!Error::Configuration("x".into()).is_retryable());
        assert_eq!(e.to_string(), "warehouse timed out after 5000 ms during list_entities");
    }
}
