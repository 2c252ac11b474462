//! Polling loop: fetch, flatten, prune, write dimensions, append.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::flatten::flatten_odds;
use crate::source::OddsSource;
use crate::store::{is_upcoming, OddsStore};

/// Counts from one completed cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub events: usize,
    pub bookmakers: usize,
    pub odds_rows: usize,
    /// Fetched rows for events that had already started
    pub expired: usize,
    pub pruned: usize,
    pub appended: usize,
    pub skipped: usize,
}

/// Service health state
#[derive(Clone, Default)]
pub struct HealthState {
    pub last_poll_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_report: Arc<RwLock<Option<CycleReport>>>,
    pub error_count: Arc<RwLock<usize>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, report: CycleReport) {
        *self.last_poll_time.write().await = Some(Utc::now());
        *self.last_report.write().await = Some(report);
        *self.error_count.write().await = 0;
    }

    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }
}

pub struct IngestionService {
    poll_interval: Duration,
    source: Box<dyn OddsSource>,
    store: OddsStore,
    health: HealthState,
}

impl IngestionService {
    pub fn new(config: &Config, source: Box<dyn OddsSource>) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            source,
            store: OddsStore::new(&config.output_dir),
            health: HealthState::new(),
        }
    }

    pub fn health(&self) -> HealthState {
        self.health.clone()
    }

    pub fn store(&self) -> &OddsStore {
        &self.store
    }

    /// Main polling loop. Never returns; a failed cycle is logged and retried on the next tick.
    pub async fn run(&self) {
        info!(
            "Starting odds ingestion loop (poll interval: {}s)",
            self.poll_interval.as_secs()
        );

        loop {
            self.tick().await;
            info!("Sleeping {} seconds...", self.poll_interval.as_secs());
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One cycle with its outcome recorded in the health state.
    pub async fn tick(&self) -> Option<CycleReport> {
        let start = Instant::now();
        match self.poll_once(Utc::now()).await {
            Ok(report) => {
                self.health.record_success(report).await;
                info!(
                    "Poll completed: {} events, {} rows ({} already started), {} pruned, {} appended, {} duplicates in {:?}",
                    report.events,
                    report.odds_rows,
                    report.expired,
                    report.pruned,
                    report.appended,
                    report.skipped,
                    start.elapsed()
                );
                Some(report)
            }
            Err(e) => {
                self.health.record_error().await;
                error!("Run failed: {}", e);
                None
            }
        }
    }

    /// Single poll iteration. A failure part-way leaves earlier writes in place.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let events = self.source.fetch().await?;
        let flat = flatten_odds(&events, now);

        let pruned = self.store.prune_expired(now)?;
        self.store.write_dimensions(&flat.events, &flat.bookmakers)?;

        // The provider keeps listing games in progress; pruning would only drop them next cycle.
        let (fresh, expired): (Vec<_>, Vec<_>) = flat
            .odds
            .iter()
            .cloned()
            .partition(|row| is_upcoming(row.event_commence_utc, now));
        if !expired.is_empty() {
            info!("Skipping {} rows for events already started", expired.len());
        }
        let appended = self.store.append_new(&fresh)?;

        Ok(CycleReport {
            events: flat.events.len(),
            bookmakers: flat.bookmakers.len(),
            odds_rows: flat.odds.len(),
            expired: expired.len(),
            pruned: pruned.removed,
            appended: appended.appended,
            skipped: appended.skipped,
        })
    }
}

/// Health check handler
async fn health_handler(
    State(health): State<HealthState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let last_poll = *health.last_poll_time.read().await;
    let last_report = *health.last_report.read().await;
    let errors = *health.error_count.read().await;

    let status = if errors > 5 { "degraded" } else { "ok" };

    let http_status = if errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "odds-line-tracker",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "last_poll": last_poll.map(|t| t.to_rfc3339()),
            "last_appended": last_report.map(|r| r.appended),
            "last_pruned": last_report.map(|r| r.pruned),
            "consecutive_errors": errors
        })),
    )
}

pub fn health_router(health: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(health)
}
