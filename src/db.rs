//! Database connection management for the loader.
//!
//! The pipeline holds exactly one connection for the whole run, so the SeaORM
//! pool is capped at a single connection.

use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use tracing::{error, info};

use crate::config::{AppConfig, ConfigError};

/// Errors that can occur while opening the destination connection.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl From<ConfigError> for DatabaseError {
    fn from(err: ConfigError) -> Self {
        DatabaseError::InvalidConfiguration {
            message: err.to_string(),
        }
    }
}

/// Opens the single connection the run writes through.
///
/// There is no retry: a destination that cannot be reached fails the run
/// before any row is read or written.
pub async fn connect(cfg: &AppConfig) -> Result<DatabaseConnection, DatabaseError> {
    let url = cfg.database.connection_url()?;
    connect_url(&url).await
}

/// Opens a connection to an explicit URL, e.g. `sqlite://events.db?mode=rwc`.
pub async fn connect_url(url: &str) -> Result<DatabaseConnection, DatabaseError> {
    if url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        });
    }

    let mut opt = ConnectOptions::new(url);
    opt.max_connections(1)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    match Database::connect(opt).await {
        Ok(conn) => {
            info!(backend = ?conn.get_database_backend(), "Connected to database");
            Ok(conn)
        }
        Err(source) => {
            error!(error = %source, "Failed to connect to database");
            Err(DatabaseError::ConnectionFailed { source })
        }
    }
}
