//! # Error Handling
//!
//! Run-level error types for the ingestion pipeline. Each stage owns its own
//! error enum; [`IngestError`] wraps them so a failed run can say which stage
//! failed, and [`IngestionFailure`] pairs that with what was already committed.

use std::time::Duration;

use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::loader::BatchInsertError;
use crate::schema::SchemaError;
use crate::source::IngestionReadError;

/// Any error that terminates an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Connect(#[from] DatabaseError),
    #[error(transparent)]
    Read(#[from] IngestionReadError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    BatchInsert(#[from] BatchInsertError),
    #[error("failed to optimize table {table}: {source}")]
    Optimize {
        table: &'static str,
        #[source]
        source: DbErr,
    },
}

impl IngestError {
    /// Pipeline stage the error originated from, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::Connect(_) => "connect",
            IngestError::Read(_) => "read",
            IngestError::Schema(_) => "schema",
            IngestError::BatchInsert(_) => "load",
            IngestError::Optimize { .. } => "optimize",
        }
    }
}

/// Outcome of a failed run: the terminating error plus the rows that were
/// committed by earlier batches and remain in the destination.
#[derive(Debug, Error)]
#[error(
    "ingestion failed during {stage} after committing {committed_rows} rows \
     in {batches_committed} batches: {error}",
    stage = .error.stage()
)]
pub struct IngestionFailure {
    pub committed_rows: u64,
    pub batches_committed: usize,
    pub elapsed: Duration,
    #[source]
    pub error: IngestError,
}

impl IngestionFailure {
    /// Failure that happened before anything could be committed.
    pub fn before_start(error: impl Into<IngestError>) -> Self {
        Self {
            committed_rows: 0,
            batches_committed: 0,
            elapsed: Duration::ZERO,
            error: error.into(),
        }
    }
}

/// Returns true when the error means the destination connection itself was lost,
/// as opposed to the statement being rejected.
pub fn is_connection_lost(error: &DbErr) -> bool {
    const MYSQL_CONNECTION_CODES: &[&str] = &["2006", "2013", "2055"];

    let runtime_err = match error {
        DbErr::ConnectionAcquire(_) => return true,
        DbErr::Conn(_) => return true,
        DbErr::Query(runtime_err) | DbErr::Exec(runtime_err) => runtime_err,
        _ => return false,
    };

    let RuntimeErr::SqlxError(sqlx_err) = runtime_err else {
        return false;
    };

    match sqlx_err {
        sea_orm::sqlx::Error::Io(_)
        | sea_orm::sqlx::Error::PoolClosed
        | sea_orm::sqlx::Error::PoolTimedOut
        | sea_orm::sqlx::Error::WorkerCrashed => true,
        other => other
            .as_database_error()
            .and_then(|db_error| db_error.code())
            .is_some_and(|code| MYSQL_CONNECTION_CODES.contains(&code.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let err = IngestError::Optimize {
            table: "user_events",
            source: DbErr::Custom("locked".to_string()),
        };
        assert_eq!(err.stage(), "optimize");

        let err: IngestError = SchemaError::CreateTable {
            table: "user_events",
            source: DbErr::Custom("denied".to_string()),
        }
        .into();
        assert_eq!(err.stage(), "schema");
    }

    #[test]
    fn test_failure_message_reports_committed_rows() {
        let failure = IngestionFailure {
            committed_rows: 10_000,
            batches_committed: 1,
            elapsed: Duration::from_secs(2),
            error: IngestError::Optimize {
                table: "user_events",
                source: DbErr::Custom("locked".to_string()),
            },
        };

        let message = failure.to_string();
        assert!(message.contains("during optimize"));
        assert!(message.contains("10000 rows in 1 batches"));
    }

    #[test]
    fn test_before_start_has_nothing_committed() {
        let failure = IngestionFailure::before_start(IngestionReadError::MissingColumn {
            column: "event_date",
        });
        assert_eq!(failure.committed_rows, 0);
        assert_eq!(failure.batches_committed, 0);
        assert_eq!(failure.error.stage(), "read");
    }

    #[test]
    fn test_connection_lost_classification() {
        assert!(is_connection_lost(&DbErr::ConnectionAcquire(
            sea_orm::ConnAcquireErr::ConnectionClosed
        )));
        assert!(is_connection_lost(&DbErr::Conn(RuntimeErr::Internal(
            "connection reset".to_string()
        ))));
        assert!(is_connection_lost(&DbErr::Exec(RuntimeErr::SqlxError(
            sea_orm::sqlx::Error::PoolClosed
        ))));
        assert!(!is_connection_lost(&DbErr::Exec(RuntimeErr::Internal(
            "syntax error".to_string()
        ))));
        assert!(!is_connection_lost(&DbErr::RecordNotFound(
            "user_events".to_string()
        )));
    }
}
