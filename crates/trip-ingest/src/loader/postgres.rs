//! PostgreSQL staging store
//!
//! The staging table is an `UNLOGGED` copy of the committed table plus a
//! `BIGSERIAL` arrival id. It is a regular table rather than `TEMPORARY`
//! because pooled connections do not share temporary tables.
//!
//! All four protocol steps for a batch run inside one transaction.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::debug;

use super::{BatchOutcome, StagingStore};
use crate::config::is_valid_identifier;
use crate::error::LoadError;
use crate::record::{StoreAndFwdFlag, TripRecord, TRIP_COLUMNS};

/// Committed table created by the migrations
pub const COMMITTED_TABLE: &str = "trips";

/// Column definitions shared by the committed table migration and staging
pub const TRIP_COLUMN_DDL: &str = r#""PickupDateTime" TIMESTAMP NOT NULL,
    "DropoffDateTime" TIMESTAMP NOT NULL,
    "PassengerCount" INTEGER NOT NULL,
    "TripDistance" NUMERIC(10, 2) NOT NULL,
    "StoreAndFwdFlag" VARCHAR(3) NOT NULL,
    "PULocationID" INTEGER NOT NULL,
    "DOLocationID" INTEGER NOT NULL,
    "FareAmount" NUMERIC(10, 2) NOT NULL,
    "TipAmount" NUMERIC(10, 2) NOT NULL"#;

/// Rows per staging INSERT; 9 binds per row stays under the 65535 bind limit
pub const STAGE_CHUNK_ROWS: usize = 5000;

/// Staging store backed by a PostgreSQL pool
pub struct PgStagingStore {
    pool: PgPool,
    staging_table: String,
    column_list: String,
}

impl PgStagingStore {
    pub fn new(pool: PgPool, staging_table: impl Into<String>) -> Result<Self, LoadError> {
        let staging_table = staging_table.into();
        if !is_valid_identifier(&staging_table) || staging_table == COMMITTED_TABLE {
            return Err(LoadError::Store(format!(
                "invalid staging table name '{}'",
                staging_table
            )));
        }

        Ok(Self {
            pool,
            staging_table,
            column_list: quoted_columns(""),
        })
    }

    async fn stage(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        records: &[TripRecord],
    ) -> Result<u64, LoadError> {
        let mut staged = 0;
        for chunk in records.chunks(STAGE_CHUNK_ROWS) {
            let mut query_builder = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO {} ({}) ",
                self.staging_table, self.column_list
            ));

            query_builder.push_values(chunk, |mut b, record| {
                b.push_bind(record.pickup_time.naive_utc())
                    .push_bind(record.dropoff_time.naive_utc())
                    .push_bind(record.passenger_count)
                    .push_bind(record.trip_distance.clone())
                    .push_bind(record.store_and_fwd_flag.as_str())
                    .push_bind(record.pu_location_id)
                    .push_bind(record.do_location_id)
                    .push_bind(record.fare_amount.clone())
                    .push_bind(record.tip_amount.clone());
            });

            staged += query_builder
                .build()
                .execute(&mut **tx)
                .await?
                .rows_affected();
        }
        Ok(staged)
    }

    /// Delete every non-keeper, returning them in arrival order
    async fn remove_intra_duplicates(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Vec<TripRecord>, LoadError> {
        let sql = format!(
            r#"
            DELETE FROM {staging} s
            USING (
                SELECT row_id,
                       ROW_NUMBER() OVER (
                           PARTITION BY "PickupDateTime", "DropoffDateTime", "PassengerCount"
                           ORDER BY row_id
                       ) AS rn
                FROM {staging}
            ) ranked
            WHERE s.row_id = ranked.row_id AND ranked.rn > 1
            RETURNING s.row_id, {columns}
            "#,
            staging = self.staging_table,
            columns = quoted_columns("s."),
        );

        let rows = sqlx::query(&sql).fetch_all(&mut **tx).await?;
        rows_in_arrival_order(rows)
    }

    /// Delete staged rows whose key is already committed
    async fn remove_committed_duplicates(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Vec<TripRecord>, LoadError> {
        let sql = format!(
            r#"
            DELETE FROM {staging} s
            WHERE EXISTS (
                SELECT 1 FROM {committed} c
                WHERE c."PickupDateTime" = s."PickupDateTime"
                  AND c."DropoffDateTime" = s."DropoffDateTime"
                  AND c."PassengerCount" = s."PassengerCount"
            )
            RETURNING s.row_id, {columns}
            "#,
            staging = self.staging_table,
            committed = COMMITTED_TABLE,
            columns = quoted_columns("s."),
        );

        let rows = sqlx::query(&sql).fetch_all(&mut **tx).await?;
        rows_in_arrival_order(rows)
    }

    async fn promote(&self, tx: &mut Transaction<'_, Postgres>) -> Result<u64, LoadError> {
        let sql = format!(
            "INSERT INTO {committed} ({columns}) SELECT {columns} FROM {staging} ORDER BY row_id",
            committed = COMMITTED_TABLE,
            columns = self.column_list,
            staging = self.staging_table,
        );
        let promoted = sqlx::query(&sql).execute(&mut **tx).await?.rows_affected();

        sqlx::query(&format!("DELETE FROM {}", self.staging_table))
            .execute(&mut **tx)
            .await?;

        Ok(promoted)
    }

    async fn count(&self, table: &str) -> Result<u64, LoadError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl StagingStore for PgStagingStore {
    async fn create_staging(&self) -> Result<(), LoadError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.staging_table))
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            "CREATE UNLOGGED TABLE {} (row_id BIGSERIAL PRIMARY KEY, {})",
            self.staging_table, TRIP_COLUMN_DDL,
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(table = %self.staging_table, "Created staging table");
        Ok(())
    }

    async fn load_batch(&self, records: &[TripRecord]) -> Result<BatchOutcome, LoadError> {
        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        let staged = self.stage(&mut tx, records).await?;
        let intra_duplicates = self.remove_intra_duplicates(&mut tx).await?;
        let committed_duplicates = self.remove_committed_duplicates(&mut tx).await?;
        let promoted = self.promote(&mut tx).await?;

        tx.commit().await?;

        Ok(BatchOutcome {
            staged,
            promoted,
            intra_duplicates,
            committed_duplicates,
        })
    }

    async fn drop_staging(&self) -> Result<(), LoadError> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.staging_table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn staged_count(&self) -> Result<u64, LoadError> {
        self.count(&self.staging_table).await
    }

    async fn committed_count(&self) -> Result<u64, LoadError> {
        self.count(COMMITTED_TABLE).await
    }
}

fn quoted_columns(prefix: &str) -> String {
    TRIP_COLUMNS
        .iter()
        .map(|c| format!("{}\"{}\"", prefix, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn rows_in_arrival_order(rows: Vec<PgRow>) -> Result<Vec<TripRecord>, LoadError> {
    let mut decoded = rows
        .iter()
        .map(|row| -> Result<(i64, TripRecord), LoadError> {
            Ok((row.try_get("row_id")?, trip_from_row(row)?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    decoded.sort_by_key(|(row_id, _)| *row_id);
    Ok(decoded.into_iter().map(|(_, record)| record).collect())
}

/// Decode a committed-schema row back into a [`TripRecord`]
pub fn trip_from_row(row: &PgRow) -> Result<TripRecord, LoadError> {
    let flag: String = row.try_get("StoreAndFwdFlag")?;
    let store_and_fwd_flag = flag.parse::<StoreAndFwdFlag>().map_err(LoadError::Store)?;

    Ok(TripRecord {
        pickup_time: row.try_get::<NaiveDateTime, _>("PickupDateTime")?.and_utc(),
        dropoff_time: row.try_get::<NaiveDateTime, _>("DropoffDateTime")?.and_utc(),
        passenger_count: row.try_get("PassengerCount")?,
        trip_distance: row.try_get("TripDistance")?,
        store_and_fwd_flag,
        pu_location_id: row.try_get("PULocationID")?,
        do_location_id: row.try_get("DOLocationID")?,
        fare_amount: row.try_get("FareAmount")?,
        tip_amount: row.try_get("TipAmount")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_columns() {
        let columns = quoted_columns("s.");
        assert!(columns.starts_with("s.\"PickupDateTime\", s.\"DropoffDateTime\""));
        assert!(columns.ends_with("s.\"TipAmount\""));
        assert_eq!(columns.matches(", ").count(), TRIP_COLUMNS.len() - 1);
    }
}
