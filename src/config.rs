//! Runtime configuration, read once at startup and handed to each component.

use std::env;
use std::path::PathBuf;

use crate::error::{IngestError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api.the-odds-api.com/v4";
pub const DEFAULT_SECRET_FILE: &str = "/run/secrets/odds_api_key";
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 3600;

/// Markets requested on every poll.
pub const MARKETS: &str = "h2h,spreads,totals";
pub const ODDS_FORMAT: &str = "american";

#[derive(Clone)]
pub struct Config {
    pub odds_api_key: String,
    pub api_base_url: String,
    pub sport_key: String,
    pub regions: String,
    pub poll_interval_seconds: u64,
    pub output_dir: PathBuf,
    /// Local payload used when the live API call fails
    pub sample_path: PathBuf,
    /// If true, run once and exit (no polling loop)
    pub run_once: bool,
    pub health_port: Option<u16>,
}

// The key never reaches logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("odds_api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("sport_key", &self.sport_key)
            .field("regions", &self.regions)
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .field("output_dir", &self.output_dir)
            .field("sample_path", &self.sample_path)
            .field("run_once", &self.run_once)
            .field("health_port", &self.health_port)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let odds_api_key = match lookup("THE_ODDS_API_KEY").or_else(|| lookup("API_KEY")) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            Some(_) => {
                return Err(IngestError::Config(
                    "THE_ODDS_API_KEY is set but empty".to_string(),
                ))
            }
            None => {
                let secret_file = lookup("ODDS_API_KEY_FILE")
                    .unwrap_or_else(|| DEFAULT_SECRET_FILE.to_string());
                read_secret_file(&secret_file)?
            }
        };

        // Prevent accidental use of sample/placeholder keys
        let key_lower = odds_api_key.to_lowercase();
        if key_lower.contains("change_me")
            || key_lower.contains("your_")
            || key_lower.starts_with("sample")
        {
            return Err(IngestError::Config(
                "THE_ODDS_API_KEY appears to be a placeholder value; replace with your real key"
                    .to_string(),
            ));
        }

        let poll_interval_seconds = match lookup("POLL_INTERVAL_SECONDS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(IngestError::Config(format!(
                        "POLL_INTERVAL_SECONDS must be a positive integer, got {raw:?}"
                    )))
                }
            },
            None => DEFAULT_POLL_INTERVAL_SECONDS,
        };

        let health_port = match lookup("HEALTH_PORT") {
            Some(raw) if !raw.trim().is_empty() => Some(raw.trim().parse::<u16>().map_err(|_| {
                IngestError::Config(format!("HEALTH_PORT must be a valid port number, got {raw:?}"))
            })?),
            _ => None,
        };

        Ok(Self {
            odds_api_key,
            api_base_url: lookup("ODDS_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            sport_key: lookup("SPORT_KEY").unwrap_or_else(|| "americanfootball_nfl".to_string()),
            regions: lookup("ODDS_REGIONS").unwrap_or_else(|| "us".to_string()),
            poll_interval_seconds,
            output_dir: PathBuf::from(lookup("OUTPUT_DIR").unwrap_or_else(|| "output".to_string())),
            sample_path: PathBuf::from(
                lookup("SAMPLE_ODDS_PATH").unwrap_or_else(|| "data/sample_odds.json".to_string()),
            ),
            run_once: lookup("RUN_ONCE")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            health_port,
        })
    }

    pub fn odds_url(&self) -> String {
        format!("{}/sports/{}/odds", self.api_base_url, self.sport_key)
    }
}

fn read_secret_file(file_path: &str) -> Result<String> {
    match std::fs::read_to_string(file_path) {
        Ok(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Ok(_) => Err(IngestError::Config(format!(
            "secret file {file_path} is empty"
        ))),
        Err(e) => Err(IngestError::Config(format!(
            "missing API key: set THE_ODDS_API_KEY or mount a secret at {file_path} ({e})"
        ))),
    }
}
