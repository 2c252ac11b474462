//! Upstream payload shapes and the three tabular row types written to disk.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The Odds API event structure
#[derive(Debug, Deserialize, Clone)]
pub struct OddsApiEvent {
    pub id: String,
    pub sport_key: String,
    #[serde(default)]
    pub sport_title: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub commence_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub home_team: Option<String>,
    #[serde(default)]
    pub away_team: Option<String>,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Bookmaker {
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub markets: Vec<Market>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Market {
    pub key: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Outcome {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "american_price")]
    pub price: Option<i32>,
    /// Spread or total line; absent for h2h
    #[serde(default)]
    pub point: Option<f64>,
}

/// Row of `events.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub sport_key: String,
    pub sport_title: Option<String>,
    pub commence_time_utc: Option<DateTime<Utc>>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
}

/// Row of `bookmakers.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmakerRow {
    pub bookmaker_key: String,
    pub bookmaker_title: Option<String>,
}

/// One point-in-time quote for one outcome. Field order is the column order of `odds.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshotRow {
    pub event_id: String,
    pub bookmaker_key: String,
    pub market_key: String,
    #[serde(default)]
    pub outcome_name: Option<String>,
    #[serde(default)]
    pub is_home_team: Option<bool>,
    #[serde(default)]
    pub price_american: Option<i32>,
    #[serde(default)]
    pub line_point: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub event_commence_utc: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub market_last_update: Option<DateTime<Utc>>,
    pub snapshot_utc: DateTime<Utc>,
}

/// Header of `odds.csv`, in write order.
pub const ODDS_COLUMNS: [&str; 10] = [
    "event_id",
    "bookmaker_key",
    "market_key",
    "outcome_name",
    "is_home_team",
    "price_american",
    "line_point",
    "event_commence_utc",
    "market_last_update",
    "snapshot_utc",
];

pub const EVENT_COLUMNS: [&str; 6] = [
    "event_id",
    "sport_key",
    "sport_title",
    "commence_time_utc",
    "home_team",
    "away_team",
];

pub const BOOKMAKER_COLUMNS: [&str; 2] = ["bookmaker_key", "bookmaker_title"];

/// Parse any timestamp spelling we have seen in payloads or on disk into UTC.
///
/// Returns `None` for blank or unrecognised input instead of failing.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    None
}

/// Parse a line point, mapping blanks and garbage to `None`.
pub fn parse_point(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn american_price<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f64> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|p| p.is_finite())
        .map(|p| p.round() as i32))
}
