//! Loader configuration

use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::transform::{TransformConfig, DEFAULT_TIMESTAMP_FORMAT};

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/trips";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default quarantine file for excluded duplicates.
pub const DEFAULT_QUARANTINE_PATH: &str = "duplicates.csv";

/// Default staging table name.
pub const DEFAULT_STAGING_TABLE: &str = "trips_staging";

/// Default source time zone (IANA name).
pub const DEFAULT_SOURCE_TIMEZONE_NAME: &str = "America/New_York";

/// Longest identifier PostgreSQL keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

/// Full loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub quarantine_path: PathBuf,
    pub staging_table: String,
    pub source_timezone: String,
    pub timestamp_format: String,
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = IngestConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parsed(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: env_parsed(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            pipeline: PipelineConfig {
                batch_size: env_parsed("TRIP_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                quarantine_path: std::env::var("TRIP_QUARANTINE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_QUARANTINE_PATH)),
                staging_table: std::env::var("TRIP_STAGING_TABLE")
                    .unwrap_or_else(|_| DEFAULT_STAGING_TABLE.to_string()),
                source_timezone: std::env::var("TRIP_SOURCE_TIMEZONE")
                    .unwrap_or_else(|_| DEFAULT_SOURCE_TIMEZONE_NAME.to_string()),
                timestamp_format: std::env::var("TRIP_TIMESTAMP_FORMAT")
                    .unwrap_or_else(|_| DEFAULT_TIMESTAMP_FORMAT.to_string()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.pipeline.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if !is_valid_identifier(&self.pipeline.staging_table) {
            anyhow::bail!(
                "Staging table '{}' is not a valid identifier",
                self.pipeline.staging_table
            );
        }

        if self.pipeline.timestamp_format.trim().is_empty() {
            anyhow::bail!("Timestamp format cannot be empty");
        }

        self.source_timezone()?;

        Ok(())
    }

    /// Parsed source time zone
    pub fn source_timezone(&self) -> anyhow::Result<Tz> {
        self.pipeline
            .source_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Unknown time zone '{}': {}", self.pipeline.source_timezone, e))
    }

    /// Transformer settings derived from this configuration
    pub fn transform_config(&self) -> anyhow::Result<TransformConfig> {
        Ok(TransformConfig::default()
            .with_source_timezone(self.source_timezone()?)
            .with_timestamp_format(self.pipeline.timestamp_format.clone()))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            pipeline: PipelineConfig {
                batch_size: DEFAULT_BATCH_SIZE,
                quarantine_path: PathBuf::from(DEFAULT_QUARANTINE_PATH),
                staging_table: DEFAULT_STAGING_TABLE.to_string(),
                source_timezone: DEFAULT_SOURCE_TIMEZONE_NAME.to_string(),
                timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            },
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Whether `name` can be spliced into SQL as an unquoted table name.
///
/// Lowercase ASCII letters, digits and underscores, starting with a letter or
/// underscore, at most 63 bytes.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');

    starts_ok
        && name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
