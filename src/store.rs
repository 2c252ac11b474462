//! On-disk CSV store: append-only odds history plus the two dimension tables.
//!
//! The dedup check-then-append sequence assumes a single writer process. Two
//! ingestion processes pointed at the same directory can both pass the key check
//! and append the same row. Readers are protected from torn rewrites because
//! whole-file writes go through a temporary file and a rename.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use tracing::info;

use crate::error::StorageError;
use crate::types::{
    parse_point, parse_timestamp, BookmakerRow, EventRow, OddsSnapshotRow, BOOKMAKER_COLUMNS,
    EVENT_COLUMNS, ODDS_COLUMNS,
};

pub const ODDS_FILE: &str = "odds.csv";
pub const EVENTS_FILE: &str = "events.csv";
pub const BOOKMAKERS_FILE: &str = "bookmakers.csv";

/// Columns that identify one quote, in key order.
pub const KEY_COLUMNS: [&str; 6] = [
    "event_id",
    "bookmaker_key",
    "market_key",
    "outcome_name",
    "line_point",
    "market_last_update",
];

/// Identity of one odds row. Two rows are the same quote iff every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    event_id: String,
    bookmaker_key: String,
    market_key: String,
    /// Empty and absent names are indistinguishable once written to CSV
    outcome_name: String,
    line_point: String,
    market_last_update: Option<DateTime<Utc>>,
}

impl CompositeKey {
    pub fn new(
        event_id: &str,
        bookmaker_key: &str,
        market_key: &str,
        outcome_name: Option<&str>,
        line_point: Option<f64>,
        market_last_update: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            event_id: event_id.to_string(),
            bookmaker_key: bookmaker_key.to_string(),
            market_key: market_key.to_string(),
            outcome_name: outcome_name.unwrap_or_default().to_string(),
            line_point: canonical_point(line_point),
            market_last_update,
        }
    }

    pub fn of(row: &OddsSnapshotRow) -> Self {
        Self::new(
            &row.event_id,
            &row.bookmaker_key,
            &row.market_key,
            row.outcome_name.as_deref(),
            row.line_point,
            row.market_last_update,
        )
    }
}

fn canonical_point(point: Option<f64>) -> String {
    match point {
        // `-0.0 == 0.0`, so this folds negative zero too.
        Some(p) if p == 0.0 => "0".to_string(),
        Some(p) if p.is_finite() => p.to_string(),
        _ => String::new(),
    }
}

/// Positions of the key columns within a stored header.
struct KeyColumns([usize; 6]);

impl KeyColumns {
    fn locate(headers: &StringRecord, path: &Path) -> Result<Self, StorageError> {
        let mut positions = [0usize; 6];
        for (slot, column) in positions.iter_mut().zip(KEY_COLUMNS) {
            *slot = column_index(headers, column, path)?;
        }
        Ok(Self(positions))
    }

    fn key(&self, record: &StringRecord) -> CompositeKey {
        let field = |i: usize| record.get(self.0[i]).unwrap_or("");
        CompositeKey::new(
            field(0),
            field(1),
            field(2),
            Some(field(3)),
            parse_point(field(4)),
            parse_timestamp(field(5)),
        )
    }
}

fn column_index(headers: &StringRecord, column: &str, path: &Path) -> Result<usize, StorageError> {
    headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| StorageError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Rows written in this call
    pub appended: usize,
    /// Incoming rows whose key was already stored (or repeated within the batch)
    pub skipped: usize,
    /// True when this call created the store
    pub created: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneOutcome {
    pub rows_before: usize,
    pub removed: usize,
}

/// File layout under one output directory.
#[derive(Debug, Clone)]
pub struct OddsStore {
    dir: PathBuf,
}

impl OddsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn odds_path(&self) -> PathBuf {
        self.dir.join(ODDS_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    pub fn bookmakers_path(&self) -> PathBuf {
        self.dir.join(BOOKMAKERS_FILE)
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))
    }

    /// Overwrite both dimension tables wholesale.
    pub fn write_dimensions(
        &self,
        events: &[EventRow],
        bookmakers: &[BookmakerRow],
    ) -> Result<(), StorageError> {
        self.ensure_dir()?;
        write_table(&self.events_path(), &EVENT_COLUMNS, events)?;
        write_table(&self.bookmakers_path(), &BOOKMAKER_COLUMNS, bookmakers)?;
        info!(
            "Wrote {} events and {} bookmakers -> {}",
            events.len(),
            bookmakers.len(),
            self.dir.display()
        );
        Ok(())
    }

    /// Keys of every stored odds row, read from the key columns only.
    pub fn existing_keys(&self) -> Result<HashSet<CompositeKey>, StorageError> {
        let path = self.odds_path();
        let mut keys = HashSet::new();
        if !has_content(&path)? {
            return Ok(keys);
        }

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| StorageError::csv(&path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| StorageError::csv(&path, e))?
            .clone();
        let columns = KeyColumns::locate(&headers, &path)?;

        for record in reader.records() {
            let record = record.map_err(|e| StorageError::csv(&path, e))?;
            keys.insert(columns.key(&record));
        }
        Ok(keys)
    }

    /// Append rows whose composite key is not stored yet. Existing content is never rewritten.
    pub fn append_new(&self, rows: &[OddsSnapshotRow]) -> Result<AppendOutcome, StorageError> {
        self.ensure_dir()?;
        let path = self.odds_path();
        let created = !has_content(&path)?;

        let mut seen = if created {
            HashSet::new()
        } else {
            self.existing_keys()?
        };
        let fresh: Vec<&OddsSnapshotRow> = rows
            .iter()
            .filter(|row| seen.insert(CompositeKey::of(row)))
            .collect();
        let outcome = AppendOutcome {
            appended: fresh.len(),
            skipped: rows.len() - fresh.len(),
            created,
        };

        if created {
            write_table(&path, &ODDS_COLUMNS, &fresh)?;
            info!("Wrote new odds file with {} rows -> {}", fresh.len(), path.display());
            return Ok(outcome);
        }

        if fresh.is_empty() {
            info!("No new odds rows (all duplicates). Nothing appended.");
            return Ok(outcome);
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        for row in &fresh {
            writer
                .serialize(row)
                .map_err(|e| StorageError::csv(&path, e))?;
        }
        writer.flush().map_err(|e| StorageError::io(&path, e))?;

        info!("Appended {} new odds rows -> {}", fresh.len(), path.display());
        Ok(outcome)
    }

    /// Drop rows whose event started before `now`. The file is only rewritten when
    /// something is removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<PruneOutcome, StorageError> {
        let path = self.odds_path();
        if !has_content(&path)? {
            return Ok(PruneOutcome::default());
        }

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| StorageError::csv(&path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| StorageError::csv(&path, e))?
            .clone();
        let commence = column_index(&headers, "event_commence_utc", &path)?;

        let mut rows_before = 0;
        let mut kept = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| StorageError::csv(&path, e))?;
            rows_before += 1;
            if is_upcoming(record.get(commence).and_then(parse_timestamp), now) {
                kept.push(record);
            }
        }

        let removed = rows_before - kept.len();
        if removed == 0 {
            info!("No expired events to delete");
            return Ok(PruneOutcome {
                rows_before,
                removed,
            });
        }

        replace_file(&path, |writer| {
            writer.write_record(&headers)?;
            for record in &kept {
                writer.write_record(record)?;
            }
            Ok(())
        })?;
        info!("Deleted {} expired rows (past event start time)", removed);

        Ok(PruneOutcome {
            rows_before,
            removed,
        })
    }
}

/// Whether an event's quotes still belong in the store. An unknown kickoff counts as started.
pub fn is_upcoming(event_commence_utc: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    event_commence_utc.is_some_and(|ts| ts >= now)
}

/// A store that is missing or zero-length has no header yet.
fn has_content(path: &Path) -> Result<bool, StorageError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len() > 0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<(), StorageError> {
    replace_file(path, |writer| {
        writer.write_record(header)?;
        for row in rows {
            writer.serialize(row)?;
        }
        Ok(())
    })
}

/// Write a whole file next to `path`, then rename it into place.
fn replace_file<F>(path: &Path, fill: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<(), csv::Error>,
{
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = File::create(&tmp_path)
        .map_err(|e| StorageError::io(&tmp_path, e))
        .and_then(|file| {
            let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
            fill(&mut writer).map_err(|e| StorageError::csv(path, e))?;
            writer.flush().map_err(|e| StorageError::io(&tmp_path, e))
        })
        .and_then(|()| fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
