//! Unified error handling for the fusion core.
//!
//! Missing data is never an error here: absence is carried by
//! [`QualityFlag::Missing`](crate::QualityFlag::Missing) or a `None` from a
//! combiner. Errors are reserved for malformed configuration, collaborator
//! failures (which the resolver downgrades to "no data"), and per-hour
//! compilation failures.

use thiserror::Error;

/// Unified error type for fusion operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    /// Malformed configuration (programmer error, not a runtime condition)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An external collaborator failed to fetch or parse
    #[error("Source '{source_name}' failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// A computation produced NaN or infinity
    #[error("Non-finite value computed for {field}")]
    NonFinite { field: String },

    /// Forecast time arithmetic left the representable range
    #[error("Forecast time out of range at hour offset {offset_hours}")]
    TimeOutOfRange { offset_hours: u32 },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FusionError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        FusionError::Config {
            message: message.into(),
        }
    }

    /// Build a collaborator error.
    pub fn source_failure(source_name: &str, message: impl Into<String>) -> Self {
        FusionError::Source {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for fusion operations.
pub type Result<T> = std::result::Result<T, FusionError>;
