//! Test utilities for loader integration tests.
//!
//! Provides file-backed SQLite destinations, generated CSV sources and small
//! query helpers.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clickstream_loader::db;
use clickstream_loader::models::UserEvent;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryOrder, Statement,
};
use tempfile::TempDir;

pub const HEADER: &str = "event_date,session,user,page_type,event_type,product\n";

/// CSV body with `count` valid records; record `i` carries session `s{i}`.
pub fn csv_with_records(count: usize) -> String {
    let mut csv = String::from(HEADER);
    for i in 0..count {
        writeln!(
            csv,
            "2024-03-{:02} {:02}:{:02}:{:02},s{},u{},product_page,view,{}",
            1 + (i / 86_400) % 28,
            (i / 3_600) % 24,
            (i / 60) % 60,
            i % 60,
            i,
            i % 101,
            i % 500
        )
        .unwrap();
    }
    csv
}

/// Writes `contents` to `name` inside `dir` and returns the path.
pub fn write_csv(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write csv fixture");
    path
}

/// Connection URL for a SQLite file inside `dir`, created on first connect.
pub fn sqlite_url(dir: &TempDir) -> String {
    sqlite_url_for(&dir.path().join("events.db"))
}

pub fn sqlite_url_for(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

pub async fn connect_sqlite(dir: &TempDir) -> Result<DatabaseConnection> {
    Ok(db::connect_url(&sqlite_url(dir)).await?)
}

pub async fn count_rows(db: &DatabaseConnection) -> Result<u64> {
    Ok(UserEvent::find().count(db).await?)
}

/// Sessions of every stored row, in `id` order.
pub async fn sessions_by_id(db: &DatabaseConnection) -> Result<Vec<Option<String>>> {
    let rows = UserEvent::find()
        .order_by_asc(clickstream_loader::models::user_event::Column::Id)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|row| row.session).collect())
}

/// Makes SQLite abort any insert whose session is `poison`.
pub async fn install_poison_trigger(db: &DatabaseConnection) -> Result<()> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "CREATE TRIGGER reject_poison BEFORE INSERT ON user_events \
         WHEN NEW.session = 'poison' \
         BEGIN SELECT RAISE(ABORT, 'poison row rejected'); END;"
            .to_string(),
    ))
    .await?;
    Ok(())
}

/// `(type, name, sql)` of every schema object, sorted by name.
pub async fn schema_objects(
    db: &DatabaseConnection,
) -> Result<Vec<(String, String, Option<String>)>> {
    let rows = db
        .query_all(Statement::from_string(
            db.get_database_backend(),
            "SELECT type, name, sql FROM sqlite_master ORDER BY name".to_string(),
        ))
        .await?;

    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        objects.push((
            row.try_get::<String>("", "type")?,
            row.try_get::<String>("", "name")?,
            row.try_get::<Option<String>>("", "sql")?,
        ));
    }
    Ok(objects)
}
