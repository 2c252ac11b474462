//! Sportsbook line-movement tracker.
//!
//! Polls The Odds API on a fixed interval, flattens each payload into events,
//! bookmakers and per-outcome quotes, and keeps an append-only CSV history of
//! quotes for events that have not started yet.

pub mod config;
pub mod error;
pub mod flatten;
pub mod history;
pub mod service;
pub mod source;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{FetchError, IngestError, StorageError};
pub use flatten::{flatten_odds, FlattenedOdds};
pub use service::{CycleReport, IngestionService};
pub use source::{FallbackSource, FixtureSource, OddsApiSource, OddsSource};
pub use store::{CompositeKey, OddsStore};
