//! Trip Ingest - bulk trip loader

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use trip_common::logging::{init_logging, LogConfig, LogLevel};
use trip_ingest::config::IngestConfig;
use trip_ingest::loader::{DuplicateAwareLoader, FileQuarantine, MemoryStagingStore, PgStagingStore};
use trip_ingest::pipeline::{PipelineOptions, RunSummary, TripPipeline};
use trip_ingest::transform::RecordTransformer;

#[derive(Parser, Debug)]
#[command(name = "trip-ingest")]
#[command(author, version, about = "Bulk trip-record loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Load a trip CSV file
    Load {
        /// Source CSV file
        file: PathBuf,

        /// Trips per load call
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Quarantine file for duplicates
        #[arg(short, long)]
        quarantine: Option<PathBuf>,

        /// Stop after this many raw records
        #[arg(short, long)]
        limit: Option<u64>,

        /// Load into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Apply pending migrations before loading
        #[arg(long)]
        migrate: bool,
    },

    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("trip-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Load {
            file,
            batch_size,
            quarantine,
            limit,
            dry_run,
            migrate,
        } => {
            if let Some(batch_size) = batch_size {
                config.pipeline.batch_size = batch_size;
            }
            if let Some(quarantine) = quarantine {
                config.pipeline.quarantine_path = quarantine;
            }
            config.validate()?;

            let summary = load(&config, file, limit, dry_run, migrate).await?;
            if summary.aborted {
                anyhow::bail!("Run aborted; see the log for the cause");
            }
        },
        Command::Migrate => {
            let pool = connect(&config).await?;
            run_migrations(&pool).await?;
        },
    }

    Ok(())
}

async fn load(
    config: &IngestConfig,
    file: PathBuf,
    limit: Option<u64>,
    dry_run: bool,
    migrate: bool,
) -> Result<RunSummary> {
    let transformer = RecordTransformer::new(config.transform_config()?);
    let options = PipelineOptions {
        batch_size: config.pipeline.batch_size,
        parse_limit: limit,
    };
    let quarantine = FileQuarantine::new(&config.pipeline.quarantine_path);
    info!("Duplicates will be written to {}", quarantine.path().display());

    if dry_run {
        info!("Dry run: loading into an in-memory store");
        let loader = DuplicateAwareLoader::new(MemoryStagingStore::new(), quarantine);
        return Ok(TripPipeline::new(transformer, loader, options)
            .run_file(&file)
            .await);
    }

    let pool = connect(config).await?;
    if migrate {
        run_migrations(&pool).await?;
    }

    let store = PgStagingStore::new(pool, config.pipeline.staging_table.clone())?;
    let loader = DuplicateAwareLoader::new(store, quarantine);
    Ok(TripPipeline::new(transformer, loader, options)
        .run_file(&file)
        .await)
}

async fn connect(config: &IngestConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    info!("Migrations applied");
    Ok(())
}
