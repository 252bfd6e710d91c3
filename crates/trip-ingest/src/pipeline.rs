//! Run orchestration
//!
//! [`TripPipeline`] drives one run strictly sequentially:
//!
//! ```text
//! Idle ─► Extracting ─► Transforming ─► Validating ─► Accumulating ─┐
//!             ▲                                                     │
//!             └──────────────── Loading (batch full) ◄──────────────┘
//!                                   │
//!                    end of input ─►└─► Loading (partial) ─► Done
//! ```
//!
//! Per-record failures are logged and skipped, per-batch load failures are
//! logged and the batch is dropped, and extraction failures end the run. The
//! staging area is torn down whatever happens, and [`TripPipeline::run`]
//! never returns an error.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::batch::{Batch, DEFAULT_BATCH_SIZE};
use crate::error::{ExtractError, LoadError};
use crate::extract::{FieldExtractor, RawRecord};
use crate::loader::BatchLoader;
use crate::transform::RecordTransformer;
use crate::validate::validate;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Transforming,
    Validating,
    Accumulating,
    Loading,
    Done,
}

/// Knobs for a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Trips per load call
    pub batch_size: usize,
    /// Stop after this many raw records have been read
    pub parse_limit: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parse_limit: None,
        }
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Trips submitted to the loader, duplicates and failed batches included
    pub processed: u64,
    pub transform_failures: u64,
    pub validation_failures: u64,
    pub batches_loaded: u64,
    pub batches_failed: u64,
    /// Trips that reached the committed store
    pub promoted: u64,
    /// Trips excluded as duplicates
    pub duplicates: u64,
    /// Committed batches whose duplicates could not all be exported
    pub export_failures: u64,
    /// The run ended early because the source or staging area was unusable
    pub aborted: bool,
}

/// Extract, transform, validate, batch and load one source
pub struct TripPipeline<L> {
    transformer: RecordTransformer,
    loader: L,
    options: PipelineOptions,
    state: PipelineState,
}

impl<L: BatchLoader> TripPipeline<L> {
    pub fn new(transformer: RecordTransformer, loader: L, options: PipelineOptions) -> Self {
        Self {
            transformer,
            loader,
            options,
            state: PipelineState::Idle,
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Open a CSV file and run it through the pipeline
    ///
    /// The run is prepared before the source is opened, so an unreadable
    /// source still leaves an emptied quarantine behind.
    pub async fn run_file(&mut self, path: impl AsRef<Path>) -> RunSummary {
        let path = path.as_ref();
        info!("Loading trips from {}", path.display());

        let mut summary = RunSummary::default();
        if !self.begin(&mut summary).await {
            return self.finish(summary).await;
        }

        match FieldExtractor::open(path) {
            Ok(extractor) => self.drive(extractor, summary).await,
            Err(e) => {
                error!(error = %e, "Cannot open trip source; run aborted");
                summary.aborted = true;
                self.finish(summary).await
            }
        }
    }

    /// Run every raw record through the pipeline
    pub async fn run<I>(&mut self, records: I) -> RunSummary
    where
        I: IntoIterator<Item = Result<RawRecord, ExtractError>>,
    {
        let mut summary = RunSummary::default();
        if !self.begin(&mut summary).await {
            return self.finish(summary).await;
        }
        self.drive(records, summary).await
    }

    async fn begin(&mut self, summary: &mut RunSummary) -> bool {
        match self.loader.begin_run().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, detail = ?e, "Failed to prepare staging area; run aborted");
                summary.aborted = true;
                false
            }
        }
    }

    async fn drive<I>(&mut self, records: I, mut summary: RunSummary) -> RunSummary
    where
        I: IntoIterator<Item = Result<RawRecord, ExtractError>>,
    {
        let mut batch = Batch::with_capacity(self.options.batch_size);
        let mut records = records.into_iter();
        let mut read: u64 = 0;

        loop {
            if self.options.parse_limit.is_some_and(|limit| read >= limit) {
                info!(limit = read, "Parse limit reached; stopping extraction");
                break;
            }

            self.transition(PipelineState::Extracting);
            let raw = match records.next() {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    error!(error = %e, after_records = read, "Extraction failed; run aborted");
                    summary.aborted = true;
                    break;
                }
                None => break,
            };
            read += 1;

            self.transition(PipelineState::Transforming);
            let record = match self.transformer.transform(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        line = raw.line,
                        fields = ?raw.fields,
                        reason = %e,
                        "Dropping record that failed to transform"
                    );
                    summary.transform_failures += 1;
                    continue;
                }
            };

            self.transition(PipelineState::Validating);
            if let Err(rule) = validate(&record) {
                warn!(
                    line = raw.line,
                    fields = ?raw.fields,
                    rule = %rule,
                    "Dropping record that broke a business rule"
                );
                summary.validation_failures += 1;
                continue;
            }

            self.transition(PipelineState::Accumulating);
            if batch.push(record) {
                self.load(&mut batch, &mut summary).await;
            }
        }

        if !summary.aborted && !batch.is_empty() {
            self.load(&mut batch, &mut summary).await;
        } else if !batch.is_empty() {
            warn!(
                discarded = batch.len(),
                "Partial batch discarded after extraction failure"
            );
            batch.clear();
        }

        self.finish(summary).await
    }

    async fn finish(&mut self, summary: RunSummary) -> RunSummary {
        self.teardown().await;
        self.transition(PipelineState::Done);

        info!(
            processed = summary.processed,
            promoted = summary.promoted,
            duplicates = summary.duplicates,
            transform_failures = summary.transform_failures,
            validation_failures = summary.validation_failures,
            batches_loaded = summary.batches_loaded,
            batches_failed = summary.batches_failed,
            export_failures = summary.export_failures,
            aborted = summary.aborted,
            "Run finished: {} trips processed",
            summary.processed
        );

        summary
    }

    async fn load(&mut self, batch: &mut Batch, summary: &mut RunSummary) {
        self.transition(PipelineState::Loading);
        let submitted = batch.len() as u64;

        match self.loader.load(batch).await {
            Ok(report) => {
                summary.batches_loaded += 1;
                summary.promoted += report.promoted;
                summary.duplicates += report.duplicates;
                info!(
                    records = submitted,
                    promoted = report.promoted,
                    duplicates = report.duplicates,
                    "Batch loaded"
                );
            }
            Err(LoadError::ExportAfterCommit {
                promoted,
                duplicates,
                source,
            }) => {
                summary.batches_loaded += 1;
                summary.export_failures += 1;
                summary.promoted += promoted;
                summary.duplicates += duplicates;
                error!(
                    records = submitted,
                    promoted,
                    duplicates,
                    error = %source,
                    "Batch committed but duplicates were not fully exported"
                );
            }
            Err(e) => {
                summary.batches_failed += 1;
                error!(
                    records = submitted,
                    error = %e,
                    detail = ?e,
                    "Batch load failed; batch dropped"
                );
            }
        }

        summary.processed += submitted;
        batch.clear();
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.loader.teardown().await {
            error!(error = %e, detail = ?e, "Failed to tear down staging area");
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Pipeline state change");
            self.state = next;
        }
    }
}
