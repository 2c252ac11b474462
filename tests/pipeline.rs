// End-to-end ingestion cycles against a scratch output directory.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use odds_line_tracker::error::Result;
use odds_line_tracker::types::{OddsApiEvent, OddsSnapshotRow};
use odds_line_tracker::{
    Config, FetchError, FixtureSource, IngestError, IngestionService, OddsSource,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()
}

fn config(out_dir: &Path) -> Config {
    let out_dir = out_dir.to_str().unwrap().to_string();
    Config::from_lookup(move |name| match name {
        "THE_ODDS_API_KEY" => Some("test-key".to_string()),
        "OUTPUT_DIR" => Some(out_dir.clone()),
        "POLL_INTERVAL_SECONDS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap()
}

fn single_game(commence: DateTime<Utc>) -> String {
    format!(
        r#"[{{
            "id": "evt1",
            "sport_key": "americanfootball_nfl",
            "sport_title": "NFL",
            "commence_time": "{}",
            "home_team": "Kansas City Chiefs",
            "away_team": "Buffalo Bills",
            "bookmakers": [{{
                "key": "draftkings",
                "title": "DraftKings",
                "last_update": "2025-09-01T10:00:00Z",
                "markets": [{{
                    "key": "h2h",
                    "last_update": "2025-09-01T10:05:00Z",
                    "outcomes": [
                        {{"name": "Kansas City Chiefs", "price": -135}},
                        {{"name": "Buffalo Bills", "price": 115}}
                    ]
                }}]
            }}]
        }}]"#,
        commence.to_rfc3339()
    )
}

fn fixture(dir: &Path, payload: &str) -> FixtureSource {
    let path = dir.join("sample_odds.json");
    fs::write(&path, payload).unwrap();
    FixtureSource::new(path)
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

/// Fails until `recovered` is set, then serves the fixture.
struct Flaky {
    recovered: Arc<AtomicBool>,
    fixture: FixtureSource,
}

#[async_trait]
impl OddsSource for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn fetch(&self) -> Result<Vec<OddsApiEvent>> {
        if self.recovered.load(Ordering::SeqCst) {
            return self.fixture.fetch().await;
        }
        Err(FetchError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: "upstream unavailable".to_string(),
        }
        .into())
    }
}

#[tokio::test]
async fn first_cycle_creates_fact_and_dimension_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("output");
    let source = fixture(dir.path(), &single_game(now() + Duration::days(6)));
    let service = IngestionService::new(&config(&out), Box::new(source));

    let report = service.poll_once(now()).await.unwrap();

    assert_eq!(report.events, 1);
    assert_eq!(report.bookmakers, 1);
    assert_eq!(report.appended, 2);
    assert_eq!(line_count(&out.join("odds.csv")), 3);
    assert_eq!(line_count(&out.join("events.csv")), 2);
    assert_eq!(line_count(&out.join("bookmakers.csv")), 2);

    let events = fs::read_to_string(out.join("events.csv")).unwrap();
    assert!(events.contains("evt1,americanfootball_nfl,NFL,"));
}

#[tokio::test]
async fn identical_payload_appends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("output");
    let source = fixture(dir.path(), &single_game(now() + Duration::days(6)));
    let service = IngestionService::new(&config(&out), Box::new(source));

    service.poll_once(now()).await.unwrap();
    let before = fs::read(out.join("odds.csv")).unwrap();

    let report = service.poll_once(now() + Duration::minutes(10)).await.unwrap();

    assert_eq!(report.appended, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(fs::read(out.join("odds.csv")).unwrap(), before);
}

#[tokio::test]
async fn started_event_is_pruned_and_not_re_added() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("output");
    let kickoff = now() + Duration::minutes(30);
    let source = fixture(dir.path(), &single_game(kickoff));
    let service = IngestionService::new(&config(&out), Box::new(source));

    assert_eq!(service.poll_once(now()).await.unwrap().appended, 2);

    // An hour after kickoff the provider still lists the game.
    let report = service
        .poll_once(kickoff + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(report.pruned, 2);
    assert_eq!(report.expired, 2);
    assert_eq!(report.appended, 0);
    assert_eq!(line_count(&out.join("odds.csv")), 1);
}

#[tokio::test]
async fn pruning_one_past_row_shrinks_store_by_one() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("output");
    let source = fixture(dir.path(), &single_game(now() + Duration::days(6)));
    let service = IngestionService::new(&config(&out), Box::new(source));

    service.poll_once(now()).await.unwrap();
    let past = OddsSnapshotRow {
        event_id: "evt0".to_string(),
        bookmaker_key: "draftkings".to_string(),
        market_key: "h2h".to_string(),
        outcome_name: Some("Dallas Cowboys".to_string()),
        is_home_team: Some(true),
        price_american: Some(-150),
        line_point: None,
        event_commence_utc: Some(now() - Duration::hours(1)),
        market_last_update: Some(now() - Duration::hours(3)),
        snapshot_utc: now() - Duration::hours(3),
    };
    service.store().append_new(&[past]).unwrap();
    assert_eq!(line_count(&out.join("odds.csv")), 4);

    let outcome = service.store().prune_expired(now()).unwrap();

    assert_eq!(outcome.removed, 1);
    assert_eq!(line_count(&out.join("odds.csv")), 3);
    assert!(!fs::read_to_string(out.join("odds.csv")).unwrap().contains("evt0"));
}

#[tokio::test]
async fn failed_fetch_touches_nothing_and_next_cycle_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("output");
    let recovered = Arc::new(AtomicBool::new(false));
    let service = IngestionService::new(
        &config(&out),
        Box::new(Flaky {
            recovered: recovered.clone(),
            fixture: fixture(dir.path(), &single_game(Utc::now() + Duration::days(6))),
        }),
    );

    let err = service.poll_once(now()).await.unwrap_err();
    assert!(matches!(err, IngestError::Fetch(_)));
    assert!(!err.is_fatal());
    assert!(!out.exists());

    assert_eq!(service.tick().await, None);
    assert_eq!(*service.health().error_count.read().await, 1);
    assert!(!out.exists());

    // Same service, next scheduled cycle.
    recovered.store(true, Ordering::SeqCst);
    let report = service.tick().await.unwrap();
    assert_eq!(report.appended, 2);
    assert_eq!(*service.health().error_count.read().await, 0);
}

#[tokio::test]
async fn bundled_sample_payload_flattens() {
    let source =
        FixtureSource::new(concat!(env!("CARGO_MANIFEST_DIR"), "/data/sample_odds.json"));
    let events = source.fetch().await.unwrap();
    let flat = odds_line_tracker::flatten_odds(&events, now());

    assert_eq!(flat.events.len(), 1);
    assert_eq!(flat.bookmakers.len(), 2);
    assert_eq!(flat.odds.len(), 8);
    // FanDuel's h2h market has no timestamp of its own.
    let book_update = Utc.with_ymd_and_hms(2026, 11, 1, 14, 1, 47).unwrap();
    assert!(flat
        .odds
        .iter()
        .filter(|r| r.bookmaker_key == "fanduel")
        .all(|r| r.market_last_update == Some(book_update)));
}
