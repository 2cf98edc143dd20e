//! # Source Reader
//!
//! Streams clickstream records out of a CSV export in fixed-size batches.
//! Only one batch is materialized at a time; the reader pulls the next
//! records from the underlying `csv::Reader` when the caller asks for the
//! next batch.

use std::fs::File;
use std::io::Read;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use thiserror::Error;
use tracing::debug;

/// Number of records per batch when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Columns that must be present in the source header.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "event_date",
    "session",
    "user",
    "page_type",
    "event_type",
    "product",
];

/// Timestamp layouts tried in order before falling back to RFC 3339 and bare dates.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// One normalized source record, ready to be written to `user_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub event_date: NaiveDateTime,
    pub session: Option<String>,
    pub user: Option<String>,
    pub page_type: Option<String>,
    pub event_type: Option<String>,
    pub product: Option<i64>,
}

/// A bounded, source-ordered run of records.
pub type EventBatch = Vec<SourceEvent>;

/// Errors that abort reading the source.
#[derive(Debug, Error)]
pub enum IngestionReadError {
    #[error("failed to open source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read source header: {source}")]
    Header {
        #[source]
        source: csv::Error,
    },
    #[error("source is missing required column '{column}'")]
    MissingColumn { column: &'static str },
    #[error("failed to read source record: {source}")]
    Record {
        #[source]
        source: csv::Error,
    },
    #[error("unparseable event_date '{value}' at line {line}: {source}")]
    Timestamp {
        line: u64,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("invalid product '{value}' at line {line}: expected an integer identifier")]
    Product { line: u64, value: String },
}

/// Positions of the required columns within each record.
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    event_date: usize,
    session: usize,
    user: usize,
    page_type: usize,
    event_type: usize,
    product: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self, IngestionReadError> {
        let position = |column: &'static str| {
            headers
                .iter()
                .position(|header| header == column)
                .ok_or(IngestionReadError::MissingColumn { column })
        };

        Ok(Self {
            event_date: position(REQUIRED_COLUMNS[0])?,
            session: position(REQUIRED_COLUMNS[1])?,
            user: position(REQUIRED_COLUMNS[2])?,
            page_type: position(REQUIRED_COLUMNS[3])?,
            event_type: position(REQUIRED_COLUMNS[4])?,
            product: position(REQUIRED_COLUMNS[5])?,
        })
    }

    fn normalize(&self, record: &StringRecord) -> Result<SourceEvent, IngestionReadError> {
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();

        let raw_date = record.get(self.event_date).unwrap_or_default();
        let event_date =
            parse_event_date(raw_date).map_err(|source| IngestionReadError::Timestamp {
                line,
                value: raw_date.to_string(),
                source,
            })?;

        let product = match optional_field(record, self.product) {
            Some(raw) => Some(parse_product(&raw).ok_or(IngestionReadError::Product {
                line,
                value: raw,
            })?),
            None => None,
        };

        Ok(SourceEvent {
            event_date,
            session: optional_field(record, self.session),
            user: optional_field(record, self.user),
            page_type: optional_field(record, self.page_type),
            event_type: optional_field(record, self.event_type),
            product,
        })
    }
}

/// Lazy, non-restartable sequence of record batches read from a CSV source.
///
/// Every batch except possibly the last holds exactly `batch_size` records.
/// The first error ends the sequence: it is yielded once and every later call
/// to `next` returns `None`.
pub struct EventBatches<R: Read> {
    records: StringRecordsIntoIter<R>,
    columns: ColumnIndex,
    batch_size: usize,
    records_read: u64,
    finished: bool,
}

impl EventBatches<File> {
    /// Open the CSV file at `path`.
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self, IngestionReadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| IngestionReadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, batch_size)
    }
}

impl<R: Read> EventBatches<R> {
    /// Build a batch stream over any reader. The header row is read eagerly so
    /// a source without the required columns fails before any batch is produced.
    pub fn from_reader(reader: R, batch_size: usize) -> Result<Self, IngestionReadError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|source| IngestionReadError::Header { source })?;
        let columns = ColumnIndex::from_headers(headers)?;

        Ok(Self {
            records: rdr.into_records(),
            columns,
            batch_size: batch_size.max(1),
            records_read: 0,
            finished: false,
        })
    }

    /// Configured maximum number of records per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of records successfully normalized so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn fail(
        &mut self,
        error: IngestionReadError,
    ) -> Option<Result<EventBatch, IngestionReadError>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl<R: Read> Iterator for EventBatches<R> {
    type Item = Result<EventBatch, IngestionReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.records.next() {
                Some(Ok(record)) => match self.columns.normalize(&record) {
                    Ok(event) => batch.push(event),
                    Err(error) => return self.fail(error),
                },
                Some(Err(source)) => return self.fail(IngestionReadError::Record { source }),
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            return None;
        }

        self.records_read += batch.len() as u64;
        debug!(
            batch_size = batch.len(),
            records_read = self.records_read,
            "Read source batch"
        );
        Some(Ok(batch))
    }
}

impl<R: Read> FusedIterator for EventBatches<R> {}

/// Parse a source timestamp into the canonical naive timestamp.
///
/// Values carrying an offset are converted to UTC before the offset is dropped.
/// A bare date maps to midnight.
pub fn parse_event_date(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let value = raw.trim();

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(timestamp);
        }
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.naive_utc());
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d").map(|date| date.and_time(NaiveTime::default()))
}

/// Parse a product identifier. Integral floats such as `"123.0"` are accepted.
fn parse_product(raw: &str) -> Option<i64> {
    if let Ok(product) = raw.parse::<i64>() {
        return Some(product);
    }

    let number = raw.parse::<f64>().ok()?;
    if number.is_finite() && number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Some(number as i64)
    } else {
        None
    }
}

fn optional_field(record: &StringRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
