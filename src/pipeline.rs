//! # Ingestion Pipeline
//!
//! Drives one run: ensure the schema, pull batches from the source one at a
//! time, commit each through the destination, then optimize the table.
//! Strictly sequential; at most one batch is held in memory.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db;
use crate::destination::{DatabaseDestination, EventDestination};
use crate::error::{IngestError, IngestionFailure};
use crate::loader::BatchPosition;
use crate::schema::TABLE_NAME;
use crate::source::{EventBatch, EventBatches, IngestionReadError};

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    SchemaEnsured,
    Loading,
    BatchCommitted,
    Completed,
    Failed,
}

impl RunState {
    /// Whether the run may move from `self` to `next`.
    pub fn allows(self, next: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, next),
            (NotStarted, SchemaEnsured)
                | (SchemaEnsured, Loading)
                | (Loading, BatchCommitted)
                | (Loading, Completed)
                | (BatchCommitted, Loading)
                | (NotStarted | SchemaEnsured | Loading | BatchCommitted, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::NotStarted => "not_started",
            RunState::SchemaEnsured => "schema_ensured",
            RunState::Loading => "loading",
            RunState::BatchCommitted => "batch_committed",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub total_rows: u64,
    /// Size of every committed batch, in commit order
    pub batch_sizes: Vec<usize>,
    pub elapsed: Duration,
}

impl IngestionReport {
    pub fn batches(&self) -> usize {
        self.batch_sizes.len()
    }
}

/// One ingestion run against a destination. Consumed by [`IngestionPipeline::run`].
pub struct IngestionPipeline<'a, D: EventDestination + ?Sized> {
    destination: &'a D,
    state: RunState,
    total_rows: u64,
    batch_sizes: Vec<usize>,
    started: Instant,
}

impl<'a, D: EventDestination + ?Sized> IngestionPipeline<'a, D> {
    pub fn new(destination: &'a D) -> Self {
        Self {
            destination,
            state: RunState::NotStarted,
            total_rows: 0,
            batch_sizes: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Run to completion. On failure the returned error reports how many rows
    /// earlier batches committed; those rows stay in the destination.
    pub async fn run<I>(mut self, batches: I) -> Result<IngestionReport, IngestionFailure>
    where
        I: IntoIterator<Item = Result<EventBatch, IngestionReadError>>,
    {
        self.started = Instant::now();

        match self.drive(batches).await {
            Ok(()) => {
                self.transition(RunState::Completed);
                let report = IngestionReport {
                    total_rows: self.total_rows,
                    batch_sizes: self.batch_sizes,
                    elapsed: self.started.elapsed(),
                };
                info!(
                    total_rows = report.total_rows,
                    batches = report.batches(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Import completed"
                );
                Ok(report)
            }
            Err(error) => {
                self.transition(RunState::Failed);
                let failure = IngestionFailure {
                    committed_rows: self.total_rows,
                    batches_committed: self.batch_sizes.len(),
                    elapsed: self.started.elapsed(),
                    error,
                };
                error!(
                    stage = failure.error.stage(),
                    committed_rows = failure.committed_rows,
                    batches_committed = failure.batches_committed,
                    error = %failure.error,
                    "Import failed"
                );
                Err(failure)
            }
        }
    }

    async fn drive<I>(&mut self, batches: I) -> Result<(), IngestError>
    where
        I: IntoIterator<Item = Result<EventBatch, IngestionReadError>>,
    {
        self.destination.ensure_schema().await?;
        self.transition(RunState::SchemaEnsured);

        let mut batches = batches
            .into_iter()
            .filter(|batch| !matches!(batch, Ok(events) if events.is_empty()));

        loop {
            self.transition(RunState::Loading);
            let Some(batch) = batches.next() else {
                break;
            };
            let batch = batch?;

            let position = BatchPosition {
                index: self.batch_sizes.len(),
                offset: self.total_rows,
            };
            let rows = self.destination.write_batch(&batch, position).await?;

            self.total_rows += rows;
            self.batch_sizes.push(batch.len());
            self.transition(RunState::BatchCommitted);
            info!(
                batch_index = position.index,
                batch_size = batch.len(),
                total_rows = self.total_rows,
                "Batch committed"
            );
        }

        self.destination
            .optimize()
            .await
            .map_err(|source| IngestError::Optimize {
                table: TABLE_NAME,
                source,
            })?;

        Ok(())
    }

    fn transition(&mut self, next: RunState) {
        if !self.state.allows(next) {
            warn!(from = %self.state, to = %next, "Unexpected run state transition");
        }
        debug!(from = %self.state, to = %next, "Run state transition");
        self.state = next;
    }
}

/// Load the configured CSV source into the configured database.
///
/// The source is opened before connecting, so a missing file touches nothing.
/// The connection is closed on every exit path.
pub async fn run_ingestion(config: &AppConfig) -> Result<IngestionReport, IngestionFailure> {
    info!(
        source = %config.source_path.display(),
        batch_size = config.batch_size,
        "Starting import"
    );

    let batches = EventBatches::open(&config.source_path, config.batch_size)
        .map_err(IngestionFailure::before_start)?;
    let connection = db::connect(config)
        .await
        .map_err(IngestionFailure::before_start)?;

    let destination = DatabaseDestination::new(connection);
    let result = IngestionPipeline::new(&destination).run(batches).await;

    if let Err(err) = destination.close().await {
        warn!(error = %err, "Failed to close database connection");
    }

    result
}
