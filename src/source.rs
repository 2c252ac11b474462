//! Where a cycle's raw odds come from: the live API, a local sample, or the first that works.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use tracing::{info, warn};

use crate::config::{Config, MARKETS, ODDS_FORMAT};
use crate::error::{FetchError, IngestError, Result};
use crate::types::OddsApiEvent;

/// The Odds API allows 45 requests per minute.
const REQUESTS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(45) {
    Some(n) => n,
    None => unreachable!(),
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Produce one payload. No retries; the scheduler's next tick is the retry.
    async fn fetch(&self) -> Result<Vec<OddsApiEvent>>;
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Live odds endpoint.
pub struct OddsApiSource {
    url: String,
    api_key: String,
    regions: String,
    http_client: reqwest::Client,
    rate_limiter: DirectLimiter,
}

impl OddsApiSource {
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(FetchError::Transport)?;

        Ok(Self {
            url: config.odds_url(),
            api_key: config.odds_api_key.clone(),
            regions: config.regions.clone(),
            http_client,
            rate_limiter: RateLimiter::direct(Quota::per_minute(REQUESTS_PER_MINUTE)),
        })
    }
}

#[async_trait]
impl OddsSource for OddsApiSource {
    fn name(&self) -> &str {
        "odds-api"
    }

    async fn fetch(&self) -> Result<Vec<OddsApiEvent>> {
        self.rate_limiter.until_ready().await;

        info!("Fetching odds from {}", self.url);
        let response = self
            .http_client
            .get(&self.url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", self.regions.as_str()),
                ("markets", MARKETS),
                ("oddsFormat", ODDS_FORMAT),
            ])
            .send()
            .await
            .map_err(transport)?;

        if let Some(remaining) = response.headers().get("x-requests-remaining") {
            info!(
                "API requests remaining: {}",
                remaining.to_str().unwrap_or("?")
            );
        }

        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(FetchError::Status { status, body }.into());
        }

        let events: Vec<OddsApiEvent> =
            serde_json::from_str(&body).map_err(FetchError::Payload)?;

        info!("Got {} events from API", events.len());
        Ok(events)
    }
}

/// The request URL carries the API key, so it is stripped before the error is logged.
fn transport(e: reqwest::Error) -> FetchError {
    FetchError::Transport(e.without_url())
}

/// A saved payload on disk, used for offline runs and as the live API's fallback.
pub struct FixtureSource {
    path: PathBuf,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OddsSource for FixtureSource {
    fn name(&self) -> &str {
        "sample"
    }

    async fn fetch(&self) -> Result<Vec<OddsApiEvent>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| FetchError::Fixture {
                path: self.path.clone(),
                source,
            })?;
        let events: Vec<OddsApiEvent> = serde_json::from_str(&raw)?;
        info!("Loaded {} events from {}", events.len(), self.path.display());
        Ok(events)
    }
}

/// Try `primary`; on a fetch failure fall back to `fallback`.
///
/// If the fallback cannot be read either, the primary's error is reported.
pub struct FallbackSource<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackSource<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P, F> OddsSource for FallbackSource<P, F>
where
    P: OddsSource,
    F: OddsSource,
{
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn fetch(&self) -> Result<Vec<OddsApiEvent>> {
        let primary_err = match self.primary.fetch().await {
            Ok(events) => return Ok(events),
            Err(e) => e,
        };

        warn!(
            "{} call failed: {}. Falling back to {}",
            self.primary.name(),
            primary_err,
            self.fallback.name()
        );

        match self.fallback.fetch().await {
            Ok(events) => Ok(events),
            Err(IngestError::Fetch(FetchError::Fixture { path, .. })) => {
                warn!("No sample payload at {}; skipping cycle", path.display());
                Err(primary_err)
            }
            Err(e) => Err(e),
        }
    }
}

/// Live API backed by the configured sample file.
pub fn default_source(config: &Config) -> Result<FallbackSource<OddsApiSource, FixtureSource>> {
    Ok(FallbackSource::new(
        OddsApiSource::new(config)?,
        FixtureSource::new(&config.sample_path),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OddsSource for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch(&self) -> Result<Vec<OddsApiEvent>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status {
                status: reqwest::StatusCode::UNAUTHORIZED,
                body: "bad key".to_string(),
            }
            .into())
        }
    }

    const SAMPLE: &str = r#"[{"id": "evt1", "sport_key": "americanfootball_nfl", "bookmakers": []}]"#;

    #[tokio::test]
    async fn fixture_reads_events_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_odds.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let events = FixtureSource::new(&path).fetch().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "evt1");
    }

    #[tokio::test]
    async fn malformed_fixture_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_odds.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FixtureSource::new(&path).fetch().await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }

    #[tokio::test]
    async fn fallback_uses_fixture_when_primary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_odds.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let source = FallbackSource::new(
            Failing {
                calls: AtomicUsize::new(0),
            },
            FixtureSource::new(&path),
        );
        let events = source.fetch().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(source.primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_reports_primary_error_when_fixture_is_missing() {
        let source = FallbackSource::new(
            Failing {
                calls: AtomicUsize::new(0),
            },
            FixtureSource::new("/nonexistent/sample_odds.json"),
        );

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Fetch(FetchError::Status { status, .. })
                if status == reqwest::StatusCode::UNAUTHORIZED
        ));
    }
}
