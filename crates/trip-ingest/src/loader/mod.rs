//! Duplicate-aware batch loading
//!
//! Every batch goes through the same four steps, executed atomically by the
//! [`StagingStore`]:
//!
//! 1. **Stage**: append all rows to the staging area, each with an arrival id.
//! 2. **Intra-staging reconciliation**: per [`DuplicateKey`], keep the row
//!    with the lowest arrival id; remove the rest.
//! 3. **Cross-store reconciliation**: remove staged rows whose key already
//!    exists in the committed store. Committed rows are never touched.
//! 4. **Promote**: move the remaining rows into the committed store and empty
//!    the staging area.
//!
//! A failure anywhere rolls the whole batch back, so the staging area is left
//! exactly as it was before step 1. Removed rows are handed to the
//! [`QuarantineSink`] after the store has committed.
//!
//! ```text
//! Batch ──► stage ──► keep first per key ──► drop keys already committed ──► promote
//!                        │                          │
//!                        └──────► quarantine ◄──────┘
//! ```

pub mod memory;
pub mod postgres;
pub mod quarantine;

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::error::LoadError;
use crate::record::{DuplicateKey, TripRecord};

pub use memory::MemoryStagingStore;
pub use postgres::PgStagingStore;
pub use quarantine::{FileQuarantine, MemoryQuarantine, QuarantineSink};

/// Result of running the four-step protocol for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows appended to the staging area
    pub staged: u64,
    /// Rows moved into the committed store
    pub promoted: u64,
    /// Non-keepers removed during intra-staging reconciliation, in arrival order
    pub intra_duplicates: Vec<TripRecord>,
    /// Rows removed because their key was already committed, in arrival order
    pub committed_duplicates: Vec<TripRecord>,
}

impl BatchOutcome {
    pub fn duplicate_count(&self) -> u64 {
        (self.intra_duplicates.len() + self.committed_duplicates.len()) as u64
    }
}

/// Relational staging area plus committed store
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Create the staging area, discarding anything a previous run left behind
    async fn create_staging(&self) -> Result<(), LoadError>;

    /// Run stage, reconcile and promote for one batch as a single unit
    async fn load_batch(&self, records: &[TripRecord]) -> Result<BatchOutcome, LoadError>;

    /// Remove the staging area
    async fn drop_staging(&self) -> Result<(), LoadError>;

    async fn staged_count(&self) -> Result<u64, LoadError>;

    async fn committed_count(&self) -> Result<u64, LoadError>;
}

/// Per-batch counts reported back to the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub staged: u64,
    pub promoted: u64,
    pub duplicates: u64,
}

/// Loader seam used by the pipeline orchestrator
#[async_trait]
pub trait BatchLoader: Send + Sync {
    /// Prepare a run: empty the quarantine sink and create an empty staging area
    async fn begin_run(&self) -> Result<(), LoadError>;

    /// Load one batch durably
    async fn load(&self, batch: &Batch) -> Result<LoadReport, LoadError>;

    /// Tear down the staging area; runs whatever the run outcome
    async fn teardown(&self) -> Result<(), LoadError>;
}

/// Split rows into keepers and duplicates by [`DuplicateKey`].
///
/// The first row seen for a key is the keeper; input order is preserved in
/// both outputs.
pub fn partition_duplicates<T, F>(rows: Vec<T>, key: F) -> (Vec<T>, Vec<T>)
where
    F: Fn(&T) -> DuplicateKey,
{
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter().partition(|row| seen.insert(key(row)))
}

/// Loader that reconciles duplicates through a [`StagingStore`] and exports
/// them to a [`QuarantineSink`].
///
/// The quarantine mutex doubles as the staging lock: while one batch is
/// between stage and promote, no other call on this loader touches the store.
pub struct DuplicateAwareLoader<S, Q> {
    store: S,
    quarantine: Mutex<Q>,
}

impl<S, Q> DuplicateAwareLoader<S, Q>
where
    S: StagingStore,
    Q: QuarantineSink,
{
    pub fn new(store: S, quarantine: Q) -> Self {
        Self {
            store,
            quarantine: Mutex::new(quarantine),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S, Q> BatchLoader for DuplicateAwareLoader<S, Q>
where
    S: StagingStore,
    Q: QuarantineSink,
{
    async fn begin_run(&self) -> Result<(), LoadError> {
        let mut quarantine = self.quarantine.lock().await;
        quarantine.reset()?;
        self.store.create_staging().await?;
        info!("Staging area created and quarantine reset");
        Ok(())
    }

    async fn load(&self, batch: &Batch) -> Result<LoadReport, LoadError> {
        let mut quarantine = self.quarantine.lock().await;
        if batch.is_empty() {
            return Ok(LoadReport::default());
        }

        let outcome = self.store.load_batch(batch.records()).await?;

        // The store has committed; attempt both groups even if the first write fails
        let intra = quarantine.append(&outcome.intra_duplicates);
        let committed = quarantine.append(&outcome.committed_duplicates);
        if let Err(source) = intra.and(committed) {
            return Err(LoadError::ExportAfterCommit {
                promoted: outcome.promoted,
                duplicates: outcome.duplicate_count(),
                source,
            });
        }

        debug!(
            staged = outcome.staged,
            promoted = outcome.promoted,
            intra_duplicates = outcome.intra_duplicates.len(),
            committed_duplicates = outcome.committed_duplicates.len(),
            "Batch reconciled"
        );

        Ok(LoadReport {
            staged: outcome.staged,
            promoted: outcome.promoted,
            duplicates: outcome.duplicate_count(),
        })
    }

    async fn teardown(&self) -> Result<(), LoadError> {
        let _guard = self.quarantine.lock().await;
        self.store.drop_staging().await?;
        info!("Staging area dropped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record::StoreAndFwdFlag;
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};
    use std::io;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Sink whose first append fails
    #[derive(Clone, Default)]
    struct FlakySink {
        appends: Arc<StdMutex<usize>>,
        written: Arc<StdMutex<Vec<TripRecord>>>,
    }

    impl QuarantineSink for FlakySink {
        fn reset(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn append(&mut self, records: &[TripRecord]) -> io::Result<()> {
            let mut appends = self.appends.lock().unwrap();
            *appends += 1;
            if *appends == 1 {
                return Err(io::Error::other("disk full"));
            }
            self.written.lock().unwrap().extend(records.iter().cloned());
            Ok(())
        }
    }

    fn trip(minute: u32, fare: i32) -> TripRecord {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, minute, 0).unwrap();
        TripRecord {
            pickup_time: at,
            dropoff_time: at,
            passenger_count: 1,
            trip_distance: BigDecimal::from(1),
            store_and_fwd_flag: StoreAndFwdFlag::No,
            pu_location_id: 1,
            do_location_id: 1,
            fare_amount: BigDecimal::from(fare),
            tip_amount: BigDecimal::from(0),
        }
    }

    #[tokio::test]
    async fn test_failed_export_still_attempts_every_group() {
        let existing = trip(9, 50);
        let sink = FlakySink::default();
        let loader = DuplicateAwareLoader::new(
            MemoryStagingStore::with_committed(vec![existing]),
            sink.clone(),
        );
        loader.begin_run().await.unwrap();

        let mut batch = Batch::with_capacity(10);
        batch.push(trip(1, 10));
        batch.push(trip(1, 11));
        batch.push(trip(9, 12));

        let err = loader.load(&batch).await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::ExportAfterCommit {
                promoted: 1,
                duplicates: 2,
                ..
            }
        ));

        // The intra group was lost to the failure; the committed group was written
        assert_eq!(*sink.written.lock().unwrap(), vec![trip(9, 12)]);
        assert_eq!(loader.store().committed_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_exports_intra_then_committed_duplicates() {
        let quarantine = MemoryQuarantine::new();
        let loader = DuplicateAwareLoader::new(
            MemoryStagingStore::with_committed(vec![trip(9, 50)]),
            quarantine.clone(),
        );
        loader.begin_run().await.unwrap();

        let mut batch = Batch::with_capacity(10);
        batch.push(trip(9, 12));
        batch.push(trip(1, 10));
        batch.push(trip(1, 11));

        let report = loader.load(&batch).await.unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(report.duplicates, 2);

        let lines = quarantine.lines().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(",11.00,"));
        assert!(lines[2].contains(",12.00,"));
    }

    fn key(minute: u32, passengers: i32) -> DuplicateKey {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, minute, 0).unwrap();
        DuplicateKey {
            pickup_time: at,
            dropoff_time: at,
            passenger_count: passengers,
        }
    }

    #[test]
    fn test_partition_keeps_first_arrival() {
        let rows = vec![
            (1, key(1, 1)),
            (2, key(1, 1)),
            (3, key(2, 1)),
            (4, key(1, 1)),
            (5, key(1, 2)),
        ];
        let (keepers, dups) = partition_duplicates(rows, |(_, k)| *k);

        let keeper_ids: Vec<_> = keepers.iter().map(|(id, _)| *id).collect();
        let dup_ids: Vec<_> = dups.iter().map(|(id, _)| *id).collect();
        assert_eq!(keeper_ids, vec![1, 3, 5]);
        assert_eq!(dup_ids, vec![2, 4]);
    }

    #[test]
    fn test_partition_empty() {
        let (keepers, dups) = partition_duplicates(Vec::<DuplicateKey>::new(), |k| *k);
        assert!(keepers.is_empty() && dups.is_empty());
    }
}
