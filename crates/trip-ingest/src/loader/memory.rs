//! In-process staging store
//!
//! Runs the load protocol as an explicit algorithm over an ordered row
//! collection. Used for dry runs and for exercising the pipeline without a
//! database. Each batch works on a copy of the staging rows and swaps the
//! result in only when every step succeeded.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{partition_duplicates, BatchOutcome, StagingStore};
use crate::error::LoadError;
use crate::record::{DuplicateKey, TripRecord};

#[derive(Debug, Clone)]
struct StagedRow {
    row_id: i64,
    record: TripRecord,
}

#[derive(Debug, Default)]
struct MemoryState {
    staging: Option<Vec<StagedRow>>,
    committed: Vec<TripRecord>,
    next_row_id: i64,
    batches: usize,
}

/// Staging area and committed store held in memory
#[derive(Debug, Default)]
pub struct MemoryStagingStore {
    state: Mutex<MemoryState>,
    fail_on_batch: Option<usize>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the committed store with rows from an earlier load
    pub fn with_committed(committed: Vec<TripRecord>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                committed,
                ..MemoryState::default()
            }),
            fail_on_batch: None,
        }
    }

    /// Make the `n`th `load_batch` call (1-based) fail after staging and
    /// reconciliation, just before promotion
    pub fn fail_on_batch(mut self, n: usize) -> Self {
        self.fail_on_batch = Some(n);
        self
    }

    /// Snapshot of the committed store in insertion order
    pub fn committed_rows(&self) -> Result<Vec<TripRecord>, LoadError> {
        Ok(self.lock()?.committed.clone())
    }

    pub fn staging_exists(&self) -> Result<bool, LoadError> {
        Ok(self.lock()?.staging.is_some())
    }

    /// Put a row into staging outside the protocol, as a crashed run would
    pub fn leave_staged(&self, record: TripRecord) -> Result<(), LoadError> {
        let mut state = self.lock()?;
        let row_id = state.next_row_id + 1;
        state.next_row_id = row_id;
        state
            .staging
            .get_or_insert_with(Vec::new)
            .push(StagedRow { row_id, record });
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, LoadError> {
        self.state
            .lock()
            .map_err(|_| LoadError::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn create_staging(&self) -> Result<(), LoadError> {
        self.lock()?.staging = Some(Vec::new());
        Ok(())
    }

    async fn load_batch(&self, records: &[TripRecord]) -> Result<BatchOutcome, LoadError> {
        let mut state = self.lock()?;
        state.batches += 1;
        let batch_number = state.batches;

        let mut working = state
            .staging
            .clone()
            .ok_or_else(|| LoadError::Store("staging area does not exist".to_string()))?;

        // 1. stage
        let mut next_row_id = state.next_row_id;
        working.extend(records.iter().cloned().map(|record| {
            next_row_id += 1;
            StagedRow { row_id: next_row_id, record }
        }));
        working.sort_by_key(|row| row.row_id);

        // 2. one keeper per key, lowest arrival id wins
        let (keepers, intra) = partition_duplicates(working, |row| row.record.duplicate_key());

        // 3. anti-join against committed rows
        let committed_keys: HashSet<DuplicateKey> =
            state.committed.iter().map(TripRecord::duplicate_key).collect();
        let (clean, against_committed): (Vec<_>, Vec<_>) = keepers
            .into_iter()
            .partition(|row| !committed_keys.contains(&row.record.duplicate_key()));

        if self.fail_on_batch == Some(batch_number) {
            return Err(LoadError::Store(format!(
                "injected failure before promoting batch {}",
                batch_number
            )));
        }

        // 4. promote and empty staging
        let promoted = clean.len() as u64;
        state.committed.extend(clean.into_iter().map(|row| row.record));
        state.staging = Some(Vec::new());
        state.next_row_id = next_row_id;

        Ok(BatchOutcome {
            staged: records.len() as u64,
            promoted,
            intra_duplicates: intra.into_iter().map(|row| row.record).collect(),
            committed_duplicates: against_committed.into_iter().map(|row| row.record).collect(),
        })
    }

    async fn drop_staging(&self) -> Result<(), LoadError> {
        self.lock()?.staging = None;
        Ok(())
    }

    async fn staged_count(&self) -> Result<u64, LoadError> {
        Ok(self.lock()?.staging.as_ref().map_or(0, |rows| rows.len() as u64))
    }

    async fn committed_count(&self) -> Result<u64, LoadError> {
        Ok(self.lock()?.committed.len() as u64)
    }
}
