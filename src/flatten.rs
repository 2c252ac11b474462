//! Turns the nested odds payload into events, bookmakers and odds rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{BookmakerRow, EventRow, OddsApiEvent, OddsSnapshotRow};

/// The three tabular views of one payload.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlattenedOdds {
    pub events: Vec<EventRow>,
    pub bookmakers: Vec<BookmakerRow>,
    pub odds: Vec<OddsSnapshotRow>,
}

/// Keyed rows that keep first-seen order but take last-seen values.
struct Dimension<T> {
    rows: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Dimension<T> {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn upsert(&mut self, key: &str, row: T) {
        match self.index.get(key) {
            Some(&pos) => self.rows[pos] = row,
            None => {
                self.index.insert(key.to_string(), self.rows.len());
                self.rows.push(row);
            }
        }
    }
}

/// Flatten a payload. `snapshot_utc` stamps every odds row and is never part of its identity.
pub fn flatten_odds(events: &[OddsApiEvent], snapshot_utc: DateTime<Utc>) -> FlattenedOdds {
    let mut event_rows = Dimension::new();
    let mut bookmaker_rows = Dimension::new();
    let mut odds = Vec::new();

    for event in events {
        event_rows.upsert(
            &event.id,
            EventRow {
                event_id: event.id.clone(),
                sport_key: event.sport_key.clone(),
                sport_title: event.sport_title.clone(),
                commence_time_utc: event.commence_time,
                home_team: event.home_team.clone(),
                away_team: event.away_team.clone(),
            },
        );

        for book in &event.bookmakers {
            bookmaker_rows.upsert(
                &book.key,
                BookmakerRow {
                    bookmaker_key: book.key.clone(),
                    bookmaker_title: book.title.clone(),
                },
            );

            for market in &book.markets {
                // Part of the identity key, so fall back to the book's timestamp.
                let market_last_update = market.last_update.or(book.last_update);

                for outcome in &market.outcomes {
                    odds.push(OddsSnapshotRow {
                        event_id: event.id.clone(),
                        bookmaker_key: book.key.clone(),
                        market_key: market.key.clone(),
                        outcome_name: outcome.name.clone(),
                        is_home_team: home_side(
                            outcome.name.as_deref(),
                            event.home_team.as_deref(),
                            event.away_team.as_deref(),
                        ),
                        price_american: outcome.price,
                        line_point: outcome.point,
                        event_commence_utc: event.commence_time,
                        market_last_update,
                        snapshot_utc,
                    });
                }
            }
        }
    }

    FlattenedOdds {
        events: event_rows.rows,
        bookmakers: bookmaker_rows.rows,
        odds,
    }
}

/// `Some(true)` for the home side, `Some(false)` for the away side, `None` for draws
/// and mismatches.
pub fn home_side(outcome: Option<&str>, home: Option<&str>, away: Option<&str>) -> Option<bool> {
    let outcome = outcome.filter(|name| !name.is_empty())?;
    if home == Some(outcome) {
        Some(true)
    } else if away == Some(outcome) {
        Some(false)
    } else {
        None
    }
}
