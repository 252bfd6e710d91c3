//! Load protocol tests against a real PostgreSQL
//!
//! Each test starts its own container, so they need Docker:
//!
//! ```bash
//! cargo test -p trip-ingest --test postgres_loader_tests -- --ignored
//! ```

mod common;

use std::str::FromStr;

use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use common::{init_tracing, raw_records, trip_row, TestPostgres};
use serial_test::serial;
use sqlx::PgPool;
use tracing::info;
use trip_ingest::loader::postgres::trip_from_row;
use trip_ingest::loader::quarantine::header_line;
use trip_ingest::loader::{
    BatchLoader, DuplicateAwareLoader, MemoryQuarantine, PgStagingStore, StagingStore,
};
use trip_ingest::pipeline::{PipelineOptions, TripPipeline};
use trip_ingest::record::{StoreAndFwdFlag, TripRecord};
use trip_ingest::transform::RecordTransformer;

fn trip(minute: u32, passengers: i32, fare: &str) -> TripRecord {
    TripRecord {
        pickup_time: Utc.with_ymd_and_hms(2020, 1, 1, 5, minute, 0).unwrap(),
        dropoff_time: Utc.with_ymd_and_hms(2020, 1, 1, 5, minute + 1, 0).unwrap(),
        passenger_count: passengers,
        trip_distance: BigDecimal::from_str("1.20").unwrap(),
        store_and_fwd_flag: StoreAndFwdFlag::No,
        pu_location_id: 238,
        do_location_id: 239,
        fare_amount: BigDecimal::from_str(fare).unwrap(),
        tip_amount: BigDecimal::from_str("0.00").unwrap(),
    }
}

async fn committed(pool: &PgPool) -> Result<Vec<TripRecord>> {
    let rows = sqlx::query(r#"SELECT * FROM trips ORDER BY "PickupDateTime", "FareAmount""#)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(trip_from_row).collect::<Result<_, _>>()?)
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_intra_batch_duplicates_keep_first_arrival() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let store = PgStagingStore::new(pg.pool().clone(), "trips_staging")?;
    store.create_staging().await?;

    let first = trip(1, 1, "6.00");
    let second = trip(1, 1, "7.50");
    let other = trip(2, 1, "7.00");
    let outcome = store
        .load_batch(&[first.clone(), second.clone(), other.clone()])
        .await?;

    info!(?outcome, "Loaded batch");
    assert_eq!(outcome.staged, 3);
    assert_eq!(outcome.promoted, 2);
    assert_eq!(outcome.intra_duplicates, vec![second]);
    assert!(outcome.committed_duplicates.is_empty());
    assert_eq!(committed(pg.pool()).await?, vec![first, other]);
    assert_eq!(store.staged_count().await?, 0);

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_committed_rows_are_never_replaced() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let store = PgStagingStore::new(pg.pool().clone(), "trips_staging")?;
    store.create_staging().await?;

    let existing = trip(5, 2, "10.00");
    store.load_batch(&[existing.clone()]).await?;

    let incoming = trip(5, 2, "99.00");
    let outcome = store.load_batch(&[incoming.clone()]).await?;

    assert_eq!(outcome.promoted, 0);
    assert_eq!(outcome.committed_duplicates, vec![incoming]);
    assert_eq!(committed(pg.pool()).await?, vec![existing]);
    assert_eq!(store.committed_count().await?, 1);

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_failed_batch_rolls_back_staging() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let store = PgStagingStore::new(pg.pool().clone(), "trips_staging")?;
    store.create_staging().await?;

    // NUMERIC(10, 2) overflows, failing the staging insert
    let oversized = trip(1, 1, "123456789012.00");
    assert!(store.load_batch(&[trip(2, 1, "5.00"), oversized]).await.is_err());

    assert_eq!(store.staged_count().await?, 0);
    assert_eq!(store.committed_count().await?, 0);

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_create_staging_discards_leftovers_and_teardown_drops() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let store = PgStagingStore::new(pg.pool().clone(), "trips_staging")?;
    store.create_staging().await?;

    sqlx::query(
        r#"INSERT INTO trips_staging ("PickupDateTime", "DropoffDateTime", "PassengerCount",
            "TripDistance", "StoreAndFwdFlag", "PULocationID", "DOLocationID", "FareAmount", "TipAmount")
           VALUES (NOW(), NOW(), 1, 1, 'No', 1, 1, 1, 0)"#,
    )
    .execute(pg.pool())
    .await?;
    assert_eq!(store.staged_count().await?, 1);

    store.create_staging().await?;
    assert_eq!(store.staged_count().await?, 0);

    store.drop_staging().await?;
    let exists: bool = sqlx::query_scalar("SELECT to_regclass('trips_staging') IS NOT NULL")
        .fetch_one(pg.pool())
        .await?;
    assert!(!exists);

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_pipeline_scenario_against_postgres() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let quarantine = MemoryQuarantine::new();
    let loader = DuplicateAwareLoader::new(
        PgStagingStore::new(pg.pool().clone(), "trips_staging")?,
        quarantine.clone(),
    );

    let mut pipeline = TripPipeline::new(
        RecordTransformer::default(),
        loader,
        PipelineOptions::default(),
    );
    let rows = vec![
        trip_row("01/01/2020 12:28:15 AM", "01/01/2020 12:33:03 AM", "1", "6.00", "N"),
        trip_row("01/01/2020 12:28:15 AM", "01/01/2020 12:33:03 AM", "1", "7.50", "N"),
        trip_row("01/01/2020 12:35:39 AM", "01/01/2020 12:43:04 AM", "1", "7.00", "N"),
    ];
    let summary = pipeline.run(raw_records(&rows)).await;

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.promoted, 2);
    assert_eq!(pipeline.loader().store().committed_count().await?, 2);

    let lines = quarantine.lines()?;
    assert_eq!(lines[0], header_line());
    assert_eq!(
        lines[1],
        "2020-01-01 05:28:15,2020-01-01 05:33:03,1,1.20,No,238,239,7.50,1.47"
    );

    // Teardown dropped the staging table
    let exists: bool = sqlx::query_scalar("SELECT to_regclass('trips_staging') IS NOT NULL")
        .fetch_one(pg.pool())
        .await?;
    assert!(!exists);

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_loader_teardown_is_safe_without_staging() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let loader = DuplicateAwareLoader::new(
        PgStagingStore::new(pg.pool().clone(), "trips_staging")?,
        MemoryQuarantine::new(),
    );

    loader.teardown().await?;
    Ok(())
}
