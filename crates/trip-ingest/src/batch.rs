//! Fixed-capacity accumulation of validated trips

use crate::record::TripRecord;

/// Default number of trips per load call
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Validated trips waiting for one load call.
///
/// Owned by the orchestrator; the loader only ever sees `&Batch`.
#[derive(Debug)]
pub struct Batch {
    records: Vec<TripRecord>,
    capacity: usize,
}

impl Batch {
    /// Create an empty batch; a capacity of zero is treated as one
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a trip, returning `true` once the batch is full
    pub fn push(&mut self, record: TripRecord) -> bool {
        self.records.push(record);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn records(&self) -> &[TripRecord] {
        &self.records
    }

    /// Drop every accumulated trip, keeping the allocation
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BATCH_SIZE)
    }
}
