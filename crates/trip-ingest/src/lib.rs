//! Trip Ingest Library
//!
//! Streams a delimited trip-record file through transform, validation and
//! batching, then loads each batch with two-tier duplicate reconciliation.
//!
//! # Stages
//!
//! - [`extract`]: lazy CSV reader yielding raw field arrays
//! - [`transform`]: raw fields to [`record::TripRecord`] (UTC times, strict numbers)
//! - [`validate`]: business rules
//! - [`batch`]: fixed-capacity accumulation
//! - [`loader`]: stage, reconcile, quarantine and promote
//! - [`pipeline`]: the orchestrator tying them together
//!
//! # Example
//!
//! ```no_run
//! use trip_ingest::loader::{DuplicateAwareLoader, FileQuarantine, MemoryStagingStore};
//! use trip_ingest::pipeline::{PipelineOptions, TripPipeline};
//! use trip_ingest::transform::RecordTransformer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let loader = DuplicateAwareLoader::new(
//!         MemoryStagingStore::new(),
//!         FileQuarantine::new("duplicates.csv"),
//!     );
//!     let mut pipeline =
//!         TripPipeline::new(RecordTransformer::default(), loader, PipelineOptions::default());
//!     let summary = pipeline.run_file("./data/trips.csv").await;
//!     println!("{} trips processed", summary.processed);
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod loader;
pub mod pipeline;
pub mod record;
pub mod transform;
pub mod validate;

pub use error::{BusinessRuleViolation, ExtractError, LoadError, TransformError};
pub use pipeline::{PipelineOptions, RunSummary, TripPipeline};
pub use record::TripRecord;
