//! # Clickstream Loader Library
//!
//! This library provides the ingestion pipeline that loads clickstream events
//! from a CSV export into the `user_events` table, including the source reader,
//! schema management, the transactional batch loader and the run orchestration.

pub mod config;
pub mod db;
pub mod destination;
pub mod error;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod telemetry;

pub use destination::{DatabaseDestination, EventDestination};
pub use error::{IngestError, IngestionFailure};
pub use pipeline::{IngestionPipeline, IngestionReport, RunState, run_ingestion};
pub use source::{DEFAULT_BATCH_SIZE, EventBatches, SourceEvent};
