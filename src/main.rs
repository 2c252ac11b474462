//! Odds line-movement ingestion service.
//!
//! Polls The Odds API, keeps `events.csv` / `bookmakers.csv` current and
//! appends new quotes to `odds.csv`. Falls back to a local sample payload when
//! the API call fails.

use anyhow::{Context, Result};
use tracing::{error, info};

use odds_line_tracker::service::health_router;
use odds_line_tracker::source::default_source;
use odds_line_tracker::{Config, IngestionService};

#[tokio::main]
async fn main() -> Result<()> {
    // Local runs may keep the key in .env; deployed containers use env vars or secrets.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("odds_line_tracker=info".parse()?),
        )
        .init();

    info!("Odds line tracker v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("Refusing to start without a valid configuration")?;
    info!("Configuration: {:?}", config);

    let source = default_source(&config)?;
    let service = IngestionService::new(&config, Box::new(source));

    if let Some(port) = config.health_port {
        let app = health_router(service.health());
        let health_addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&health_addr)
            .await
            .with_context(|| format!("Failed to bind health endpoint on {}", health_addr))?;
        info!("Health endpoint listening on {}", health_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Health endpoint stopped: {}", e);
            }
        });
    }

    if config.run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        let report = service
            .poll_once(chrono::Utc::now())
            .await
            .context("One-shot sync failed")?;
        info!(
            "One-shot sync completed: {} appended, {} pruned",
            report.appended, report.pruned
        );
        return Ok(());
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = service.run() => {}
        _ = &mut ctrl_c => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
