//! Read side of the odds history: what a chart or dashboard needs from `odds.csv`.
//!
//! The writer only guarantees key uniqueness at write time, so everything here
//! re-deduplicates before building series.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::StorageError;
use crate::store::CompositeKey;
use crate::types::OddsSnapshotRow;

pub const DEFAULT_READ_ATTEMPTS: usize = 5;
pub const DEFAULT_READ_DELAY: Duration = Duration::from_millis(200);

/// Read every row of the store.
pub fn read_history(path: &Path) -> Result<Vec<OddsSnapshotRow>, StorageError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| StorageError::csv(path, e))?;
    reader
        .deserialize()
        .collect::<Result<Vec<OddsSnapshotRow>, _>>()
        .map_err(|e| StorageError::csv(path, e))
}

/// Read the store, retrying while the ingestion process may be mid-write.
pub async fn load_history(
    path: &Path,
    attempts: usize,
    delay: Duration,
) -> Result<Vec<OddsSnapshotRow>, StorageError> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match read_history(path) {
            Ok(rows) => return Ok(rows),
            Err(e) if attempt < attempts => {
                warn!(
                    "Read attempt {} of {} on {} failed: {}. Retrying...",
                    attempt,
                    attempts,
                    path.display(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Rows usable for an "upcoming" view: complete identity and a kickoff at or after `now`.
pub fn upcoming(rows: Vec<OddsSnapshotRow>, now: DateTime<Utc>) -> Vec<OddsSnapshotRow> {
    rows.into_iter()
        .filter(|row| !row.event_id.is_empty() && !row.market_key.is_empty())
        .filter(|row| row.market_last_update.is_some())
        .filter(|row| row.event_commence_utc.is_some_and(|ts| ts >= now))
        .collect()
}

/// Keep the last occurrence of each composite key, in original order.
pub fn dedup_latest(rows: Vec<OddsSnapshotRow>) -> Vec<OddsSnapshotRow> {
    let mut seen = HashSet::new();
    let mut kept: Vec<OddsSnapshotRow> = rows
        .into_iter()
        .rev()
        .filter(|row| seen.insert(CompositeKey::of(row)))
        .collect();
    kept.reverse();
    kept
}

/// Distinct event ids, soonest kickoff first.
pub fn events_by_kickoff(rows: &[OddsSnapshotRow]) -> Vec<String> {
    let mut kickoffs: HashMap<&str, Option<DateTime<Utc>>> = HashMap::new();
    for row in rows {
        kickoffs
            .entry(row.event_id.as_str())
            .or_insert(row.event_commence_utc);
    }

    let mut ordered: Vec<(&str, Option<DateTime<Utc>>)> = kickoffs.into_iter().collect();
    // Unknown kickoffs sort last; ties break on id so output is stable.
    ordered.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.0.cmp(b.0)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.0.cmp(b.0),
    });
    ordered.into_iter().map(|(id, _)| id.to_string()).collect()
}

/// The two sides of an event as recorded by `is_home_team`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matchup {
    pub away: String,
    pub home: String,
}

impl Matchup {
    /// "Away @ Home"
    pub fn title(&self) -> String {
        format!("{} @ {}", self.away, self.home)
    }

    /// Away side first, home side second, anything else after.
    pub fn side_order(&self, outcome_name: &str) -> u8 {
        if outcome_name == self.away {
            0
        } else if outcome_name == self.home {
            1
        } else {
            2
        }
    }
}

/// Home and away team names for `event_id`, if both sides appear in the rows.
pub fn matchup(rows: &[OddsSnapshotRow], event_id: &str) -> Option<Matchup> {
    let mut away = None;
    let mut home = None;
    for row in rows.iter().filter(|r| r.event_id == event_id) {
        let Some(name) = row.outcome_name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        match row.is_home_team {
            Some(true) if home.is_none() => home = Some(name.to_string()),
            Some(false) if away.is_none() => away = Some(name.to_string()),
            _ => {}
        }
    }
    Some(Matchup {
        away: away?,
        home: home?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinePoint {
    pub at: DateTime<Utc>,
    pub price_american: i32,
    pub line_point: Option<f64>,
}

/// One sportsbook's quotes for one outcome over time.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSeries {
    pub outcome_name: String,
    pub bookmaker_key: String,
    pub points: Vec<LinePoint>,
}

/// Series for one event and market, ordered by outcome then bookmaker, points by time.
pub fn line_movement(
    rows: &[OddsSnapshotRow],
    event_id: &str,
    market_key: &str,
) -> Vec<LineSeries> {
    let mut grouped: HashMap<(String, String), Vec<LinePoint>> = HashMap::new();

    for row in rows {
        if row.event_id != event_id || row.market_key != market_key {
            continue;
        }
        let (Some(at), Some(price)) = (row.market_last_update, row.price_american) else {
            continue;
        };
        let outcome = row.outcome_name.clone().unwrap_or_default();
        if outcome.is_empty() {
            continue;
        }

        grouped
            .entry((outcome, row.bookmaker_key.clone()))
            .or_default()
            .push(LinePoint {
                at,
                price_american: price,
                line_point: row.line_point,
            });
    }

    let mut series: Vec<LineSeries> = grouped
        .into_iter()
        .map(|((outcome_name, bookmaker_key), mut points)| {
            points.sort_by_key(|p| p.at);
            LineSeries {
                outcome_name,
                bookmaker_key,
                points,
            }
        })
        .collect();
    series.sort_by(|a, b| {
        a.outcome_name
            .cmp(&b.outcome_name)
            .then_with(|| a.bookmaker_key.cmp(&b.bookmaker_key))
    });
    series
}

/// Display name for a market key.
pub fn market_label(market_key: &str) -> &str {
    match market_key {
        "h2h" => "Moneyline",
        "spreads" => "Spread",
        "totals" => "Total",
        other => other,
    }
}

/// American odds with an explicit sign, e.g. `+150` / `-110`.
pub fn format_american(price: i32) -> String {
    if price > 0 {
        format!("+{price}")
    } else {
        price.to_string()
    }
}
