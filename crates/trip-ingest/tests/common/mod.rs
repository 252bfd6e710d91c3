//! Shared helpers for trip-ingest integration tests
//!
//! - CSV fixtures in the NYC TLC layout
//! - A PostgreSQL container with migrations applied
//! - Test tracing setup

#![allow(dead_code)]

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::debug;
use trip_ingest::error::ExtractError;
use trip_ingest::extract::{FieldExtractor, RawRecord};

pub const HEADER: &str = "tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,store_and_fwd_flag,PULocationID,DOLocationID,fare_amount,tip_amount";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,trip_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// One source row; times are Eastern wall clock
pub fn trip_row(pickup: &str, dropoff: &str, passengers: &str, fare: &str, flag: &str) -> String {
    format!(
        "{},{},{},1.20,{},238,239,{},1.47",
        pickup, dropoff, passengers, flag, fare
    )
}

pub fn csv_text(rows: &[String]) -> String {
    format!("{}\n{}\n", HEADER, rows.join("\n"))
}

/// Raw records for an in-memory CSV
pub fn raw_records(rows: &[String]) -> Vec<Result<RawRecord, ExtractError>> {
    let text = csv_text(rows);
    match FieldExtractor::from_reader(text.as_bytes()) {
        Ok(extractor) => extractor.collect(),
        Err(e) => vec![Err(e)],
    }
}

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default().with_tag("16-alpine").start().await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("Connecting to test database at {}", conn_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&conn_string)
            .await?;

        sqlx::migrate!("../../migrations").run(&pool).await?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
