//! Error taxonomy for the load pipeline
//!
//! Each pipeline stage has its own error type so the orchestrator can apply
//! the matching recovery policy:
//!
//! | Stage     | Error                   | Recovery                         |
//! |-----------|-------------------------|----------------------------------|
//! | Extract   | [`ExtractError`]        | fatal, run ends after teardown   |
//! | Transform | [`TransformError`]      | record dropped with a warning    |
//! | Validate  | [`BusinessRuleViolation`] | record dropped with a warning  |
//! | Load      | [`LoadError`]           | batch dropped with an error      |

use std::path::PathBuf;
use thiserror::Error;

/// Failure converting a raw field array into a trip record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Required field '{column}' is empty or missing")]
    EmptyField { column: String },

    #[error("Malformed field '{column}' (value '{value}'): {reason}")]
    MalformedField {
        column: String,
        value: String,
        reason: String,
    },
}

impl TransformError {
    pub(crate) fn malformed(
        column: &str,
        value: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        TransformError::MalformedField {
            column: column.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Column the failure was detected in
    pub fn column(&self) -> &str {
        match self {
            TransformError::EmptyField { column } => column,
            TransformError::MalformedField { column, .. } => column,
        }
    }
}

/// Business rule a well-formed trip record failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessRuleViolation {
    #[error("dropoff time precedes pickup time")]
    DropoffBeforePickup,

    #[error("passenger count is negative")]
    NegativePassengerCount,

    #[error("fare amount is negative")]
    NegativeFareAmount,

    #[error("tip amount is negative")]
    NegativeTipAmount,
}

/// Failure reading the source feed
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to read record: {0}")]
    Read(#[from] csv::Error),
}

/// Failure staging, reconciling or promoting one batch
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Quarantine export failed: {0}")]
    Quarantine(#[from] std::io::Error),

    /// The batch was committed but some of its duplicates were not exported
    #[error("Batch committed ({promoted} promoted) but exporting {duplicates} duplicates failed: {source}")]
    ExportAfterCommit {
        promoted: u64,
        duplicates: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Store error: {0}")]
    Store(String),
}
