//! # Batch Loader
//!
//! Appends one normalized batch to `user_events` inside a single transaction.
//! Either every row of the batch is committed or, after an explicit rollback,
//! none is. Also hosts the post-load optimize pass.

use std::fmt;
use std::time::Instant;

use metrics::{counter, histogram};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, EntityTrait,
    Statement, TransactionTrait,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::error::is_connection_lost;
use crate::models::user_event::{ActiveModel as UserEventActiveModel, Entity as UserEvent};
use crate::schema::TABLE_NAME;
use crate::source::SourceEvent;

/// Bind parameters each inserted row consumes.
const PARAMS_PER_ROW: usize = 6;

/// Where a batch sits within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchPosition {
    /// Zero-based batch number
    pub index: usize,
    /// Number of source records that preceded this batch
    pub offset: u64,
}

/// Step of the batch transaction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStep {
    Begin,
    Insert,
    Commit,
}

impl BatchStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStep::Begin => "begin",
            BatchStep::Insert => "insert",
            BatchStep::Commit => "commit",
        }
    }
}

impl fmt::Display for BatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch the destination rejected. Nothing from it was committed.
#[derive(Debug, Error)]
#[error(
    "batch {batch_index} ({batch_size} rows at offset {offset}) failed during {step}: {source}"
)]
pub struct BatchInsertError {
    pub batch_index: usize,
    pub batch_size: usize,
    pub offset: u64,
    pub step: BatchStep,
    #[source]
    pub source: DbErr,
}

impl BatchInsertError {
    pub fn new(position: BatchPosition, batch_size: usize, step: BatchStep, source: DbErr) -> Self {
        Self {
            batch_index: position.index,
            batch_size,
            offset: position.offset,
            step,
            source,
        }
    }

    /// True when the failure was the connection going away rather than a rejected row.
    pub fn is_connection_lost(&self) -> bool {
        is_connection_lost(&self.source)
    }
}

/// Largest number of rows one INSERT statement can carry on `backend`.
pub fn max_rows_per_statement(backend: DbBackend) -> usize {
    let max_params = match backend {
        DbBackend::MySql | DbBackend::Postgres => 65_535,
        DbBackend::Sqlite => 32_766,
    };
    max_params / PARAMS_PER_ROW
}

/// Writes batches to `user_events` over a borrowed connection.
pub struct BatchLoader<'a> {
    db: &'a DatabaseConnection,
    rows_per_statement: usize,
}

impl<'a> BatchLoader<'a> {
    /// Create a loader that packs as many rows per statement as the backend allows.
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self {
            db,
            rows_per_statement: max_rows_per_statement(db.get_database_backend()),
        }
    }

    /// Cap the rows per INSERT statement. Values above the backend limit are clamped.
    pub fn with_rows_per_statement(mut self, rows: usize) -> Self {
        let ceiling = max_rows_per_statement(self.db.get_database_backend());
        self.rows_per_statement = rows.clamp(1, ceiling);
        self
    }

    /// Commit `batch` atomically and return the number of rows written.
    #[instrument(
        skip_all,
        fields(batch_index = position.index, batch_size = batch.len(), offset = position.offset)
    )]
    pub async fn load(
        &self,
        batch: &[SourceEvent],
        position: BatchPosition,
    ) -> Result<u64, BatchInsertError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let fail = |step: BatchStep, source: DbErr| {
            counter!("ingest_batch_failures_total", "step" => step.as_str()).increment(1);
            error!(
                step = step.as_str(),
                connection_lost = is_connection_lost(&source),
                error = %source,
                "Error inserting batch"
            );
            BatchInsertError::new(position, batch.len(), step, source)
        };

        let txn = self
            .db
            .begin()
            .await
            .map_err(|source| fail(BatchStep::Begin, source))?;

        let rows = match self.insert_rows(&txn, batch).await {
            Ok(rows) => rows,
            Err(source) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Rollback of rejected batch failed");
                } else {
                    debug!("Rolled back rejected batch");
                }
                return Err(fail(BatchStep::Insert, source));
            }
        };

        txn.commit()
            .await
            .map_err(|source| fail(BatchStep::Commit, source))?;

        let elapsed = started.elapsed();
        counter!("ingest_batches_committed_total").increment(1);
        counter!("ingest_rows_committed_total").increment(rows);
        histogram!("ingest_batch_commit_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
        info!(
            rows,
            elapsed_ms = elapsed.as_millis() as u64,
            "Successfully inserted {} records",
            rows
        );

        Ok(rows)
    }

    async fn insert_rows(
        &self,
        txn: &DatabaseTransaction,
        batch: &[SourceEvent],
    ) -> Result<u64, DbErr> {
        let mut rows = 0;
        for chunk in batch.chunks(self.rows_per_statement) {
            let models = chunk.iter().map(UserEventActiveModel::from);
            rows += UserEvent::insert_many(models)
                .exec_without_returning(txn)
                .await?;
        }
        Ok(rows)
    }
}

/// Run the storage engine's optimize/compaction pass over `user_events`.
pub async fn optimize_table<C>(db: &C) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let backend = db.get_database_backend();
    let sql = match backend {
        DbBackend::MySql => format!("OPTIMIZE TABLE {}", TABLE_NAME),
        DbBackend::Postgres => format!("VACUUM ANALYZE {}", TABLE_NAME),
        DbBackend::Sqlite => "VACUUM".to_string(),
    };

    let started = Instant::now();
    db.execute(Statement::from_string(backend, sql)).await?;
    info!(
        table = TABLE_NAME,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Optimized table"
    );
    Ok(())
}
