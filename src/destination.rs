//! Destination seam for the ingestion pipeline.
//!
//! The pipeline only talks to [`EventDestination`]; [`DatabaseDestination`] is
//! the SeaORM-backed implementation used by the binary.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};

use crate::loader::{BatchInsertError, BatchLoader, BatchPosition, optimize_table};
use crate::schema::{SchemaError, ensure_schema};
use crate::source::SourceEvent;

/// Where normalized events end up.
#[async_trait]
pub trait EventDestination: Send + Sync {
    /// Create the event table and its indexes if absent.
    async fn ensure_schema(&self) -> Result<(), SchemaError>;

    /// Atomically append one batch, returning the number of rows committed.
    async fn write_batch(
        &self,
        batch: &[SourceEvent],
        position: BatchPosition,
    ) -> Result<u64, BatchInsertError>;

    /// Post-load optimize/compaction pass.
    async fn optimize(&self) -> Result<(), DbErr>;
}

/// Relational destination reached through one SeaORM connection.
pub struct DatabaseDestination {
    db: DatabaseConnection,
    rows_per_statement: Option<usize>,
}

impl DatabaseDestination {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            rows_per_statement: None,
        }
    }

    /// Limit how many rows go into each INSERT statement of a batch.
    pub fn with_rows_per_statement(mut self, rows: usize) -> Self {
        self.rows_per_statement = Some(rows);
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Release the underlying connection.
    pub async fn close(self) -> Result<(), DbErr> {
        self.db.close().await
    }

    fn loader(&self) -> BatchLoader<'_> {
        let loader = BatchLoader::new(&self.db);
        match self.rows_per_statement {
            Some(rows) => loader.with_rows_per_statement(rows),
            None => loader,
        }
    }
}

#[async_trait]
impl EventDestination for DatabaseDestination {
    async fn ensure_schema(&self) -> Result<(), SchemaError> {
        ensure_schema(&self.db).await
    }

    async fn write_batch(
        &self,
        batch: &[SourceEvent],
        position: BatchPosition,
    ) -> Result<u64, BatchInsertError> {
        self.loader().load(batch, position).await
    }

    async fn optimize(&self) -> Result<(), DbErr> {
        optimize_table(&self.db).await
    }
}
