//! Error types shared across the trip loader crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, TripError>;

/// Workspace-wide error type for configuration and environment failures
#[derive(Error, Debug)]
pub enum TripError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidSetting { key: String, value: String },
}

impl TripError {
    /// Build an [`TripError::InvalidSetting`] for an environment key
    pub fn invalid_setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        TripError::InvalidSetting {
            key: key.into(),
            value: value.into(),
        }
    }
}
