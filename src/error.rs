//! Error types for the gsa crate.
//!
//! This module provides a unified error type for sample construction,
//! objective evaluation and sensitivity estimation.

use thiserror::Error;

/// Error type for gsa operations.
#[derive(Debug, Error)]
pub enum GsaError {
    /// A required combination of construction arguments was not satisfied.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the missing or conflicting arguments.
        message: String,
    },

    /// A loaded or supplied array does not match any contractually valid shape.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The accepted shape(s).
        expected: String,
        /// The shape that was actually observed.
        actual: String,
    },

    /// A referenced input file does not exist.
    #[error("cannot find input file '{path}'")]
    MissingFile {
        /// Path of the missing file.
        path: String,
    },

    /// The objective function returned a different output arity than probed.
    #[error("objective returned {actual} values at row {row}, expected {expected}")]
    ObjectiveShape {
        /// Output arity determined from the first evaluation.
        expected: usize,
        /// Arity of the offending result.
        actual: usize,
        /// Absolute sample row at which the mismatch occurred.
        row: usize,
    },

    /// The output variance is zero or indistinguishable from zero.
    #[error("degenerate variance {variance:e} for output component {component}")]
    DegenerateVariance {
        /// Index of the output component with (near-)zero variance.
        component: usize,
        /// The estimated variance.
        variance: f64,
    },

    /// A caller-supplied callback requested that evaluation stop.
    #[error("evaluation cancelled after {completed} of {total} calls")]
    Cancelled {
        /// Number of objective calls completed before cancellation.
        completed: usize,
        /// Total number of calls the evaluation would have made.
        total: usize,
    },

    /// A numeric text table contained a malformed value.
    #[error("parse error in '{path}' at line {line}: {message}")]
    Parse {
        /// Path of the offending file.
        path: String,
        /// 1-based line number.
        line: usize,
        /// Description of the malformed content.
        message: String,
    },

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for gsa operations.
pub type Result<T> = std::result::Result<T, GsaError>;

impl GsaError {
    /// Returns true if this error was raised while validating construction arguments.
    pub fn is_config_error(&self) -> bool {
        matches!(self, GsaError::Config { .. })
    }

    /// Returns true if this is a file or I/O error.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            GsaError::MissingFile { .. } | GsaError::Parse { .. } | GsaError::Io(_)
        )
    }
}
