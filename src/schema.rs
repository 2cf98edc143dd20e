//! # Schema Manager
//!
//! Ensures the `user_events` table and its secondary indexes exist before the
//! first batch is written. Every statement is create-if-absent, so running it
//! against a destination that already has the table is a no-op.

use sea_orm::sea_query::{
    ColumnDef, Expr, Index, IndexCreateStatement, Query, SelectStatement, Table,
    TableCreateStatement,
};
use sea_orm::{ConnectionTrait, DbBackend, DbErr, DeriveIden};
use thiserror::Error;
use tracing::{error, info};

/// Name of the fact table the pipeline writes.
pub const TABLE_NAME: &str = "user_events";

/// Secondary (non-unique) indexes, by name and column.
const SECONDARY_INDEXES: [(&str, UserEvents); 5] = [
    ("idx_event_date", UserEvents::EventDate),
    ("idx_user", UserEvents::User),
    ("idx_session", UserEvents::Session),
    ("idx_page_type", UserEvents::PageType),
    ("idx_event_type", UserEvents::EventType),
];

/// Errors raised when the destination rejects the table definition.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("destination rejected definition of table {table}: {source}")]
    CreateTable {
        table: &'static str,
        #[source]
        source: DbErr,
    },
    #[error("destination rejected index {index} on {table}: {source}")]
    CreateIndex {
        table: &'static str,
        index: &'static str,
        #[source]
        source: DbErr,
    },
    #[error("existing table {table} does not match the expected columns: {source}")]
    Incompatible {
        table: &'static str,
        #[source]
        source: DbErr,
    },
}

#[derive(DeriveIden, Clone, Copy)]
enum UserEvents {
    Table,
    Id,
    EventDate,
    Session,
    User,
    PageType,
    EventType,
    Product,
    CreatedAt,
}

/// Create `user_events` and its indexes if absent, then check that the table
/// carries every expected column.
pub async fn ensure_schema<C>(db: &C) -> Result<(), SchemaError>
where
    C: ConnectionTrait,
{
    let backend = db.get_database_backend();

    db.execute(backend.build(&table_statement(backend)))
        .await
        .map_err(|source| {
            error!(table = TABLE_NAME, error = %source, "Error creating table");
            SchemaError::CreateTable {
                table: TABLE_NAME,
                source,
            }
        })?;

    // MySQL gets its indexes inline with the table definition.
    if backend != DbBackend::MySql {
        for (name, column) in SECONDARY_INDEXES {
            db.execute(backend.build(&index_statement(name, column)))
                .await
                .map_err(|source| {
                    error!(
                        table = TABLE_NAME,
                        index = name,
                        error = %source,
                        "Error creating index"
                    );
                    SchemaError::CreateIndex {
                        table: TABLE_NAME,
                        index: name,
                        source,
                    }
                })?;
        }
    }

    db.query_all(backend.build(&shape_check_statement()))
        .await
        .map_err(|source| {
            error!(table = TABLE_NAME, error = %source, "Existing table has an incompatible shape");
            SchemaError::Incompatible {
                table: TABLE_NAME,
                source,
            }
        })?;

    info!(table = TABLE_NAME, "Table created or already exists");
    Ok(())
}

fn table_statement(backend: DbBackend) -> TableCreateStatement {
    let mut id = ColumnDef::new(UserEvents::Id);
    // SQLite only auto-assigns rowids for an INTEGER primary key.
    match backend {
        DbBackend::Sqlite => id.integer(),
        _ => id.big_integer(),
    };
    id.not_null().auto_increment().primary_key();

    let mut table = Table::create();
    table
        .table(UserEvents::Table)
        .if_not_exists()
        .col(&mut id)
        .col(ColumnDef::new(UserEvents::EventDate).date_time().not_null())
        .col(ColumnDef::new(UserEvents::Session).string_len(255).null())
        .col(ColumnDef::new(UserEvents::User).string_len(255).null())
        .col(ColumnDef::new(UserEvents::PageType).string_len(50).null())
        .col(ColumnDef::new(UserEvents::EventType).string_len(50).null())
        .col(ColumnDef::new(UserEvents::Product).big_integer().null())
        .col(
            ColumnDef::new(UserEvents::CreatedAt)
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        );

    if backend == DbBackend::MySql {
        for (name, column) in SECONDARY_INDEXES {
            table.index(Index::create().name(name).col(column));
        }
        table
            .engine("InnoDB")
            .character_set("utf8mb4")
            .collate("utf8mb4_unicode_ci");
    }

    table
}

fn index_statement(name: &'static str, column: UserEvents) -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name(name)
        .table(UserEvents::Table)
        .col(column)
        .to_owned()
}

fn shape_check_statement() -> SelectStatement {
    Query::select()
        .columns([
            UserEvents::Id,
            UserEvents::EventDate,
            UserEvents::Session,
            UserEvents::User,
            UserEvents::PageType,
            UserEvents::EventType,
            UserEvents::Product,
            UserEvents::CreatedAt,
        ])
        .from(UserEvents::Table)
        .limit(0)
        .to_owned()
}
