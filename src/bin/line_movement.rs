//! Print line movement for one upcoming event from the stored odds history.
//!
//! Usage: cargo run --bin line_movement -- [EVENT_ID] [MARKET]
//!
//! Reads `$OUTPUT_DIR/odds.csv` (default `output/odds.csv`). Without an event id
//! the soonest upcoming event is shown; the market defaults to `h2h`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use odds_line_tracker::history::{
    dedup_latest, events_by_kickoff, format_american, line_movement, load_history, market_label,
    matchup, upcoming, DEFAULT_READ_ATTEMPTS, DEFAULT_READ_DELAY,
};
use odds_line_tracker::store::ODDS_FILE;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("odds_line_tracker=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let event_arg = args.next();
    let market = args.next().unwrap_or_else(|| "h2h".to_string());

    let out_dir = std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".to_string());
    let path = PathBuf::from(out_dir).join(ODDS_FILE);
    if !path.exists() {
        bail!("Waiting for {} ...", path.display());
    }

    let rows = load_history(&path, DEFAULT_READ_ATTEMPTS, DEFAULT_READ_DELAY)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rows = dedup_latest(upcoming(rows, Utc::now()));

    let event_id = match event_arg {
        Some(id) => id,
        None => match events_by_kickoff(&rows).into_iter().next() {
            Some(id) => id,
            None => {
                println!("No upcoming events found in {} yet.", path.display());
                return Ok(());
            }
        },
    };

    let teams = matchup(&rows, &event_id);
    let title = teams
        .as_ref()
        .map(|t| t.title())
        .unwrap_or_else(|| event_id.clone());

    let mut series = line_movement(&rows, &event_id, &market);
    if series.is_empty() {
        println!("No {} quotes for {}", market_label(&market), title);
        return Ok(());
    }
    if let Some(teams) = &teams {
        series.sort_by_key(|line| teams.side_order(&line.outcome_name));
    }

    println!("{} ({})", title, market_label(&market));

    let mut current_outcome = "";
    for line in &series {
        if line.outcome_name != current_outcome {
            current_outcome = &line.outcome_name;
            println!("\n{} {}", line.outcome_name, market_label(&market));
        }
        println!("  {}", line.bookmaker_key);
        for point in &line.points {
            let line_point = point
                .line_point
                .map(|p| format!(" ({p:+})"))
                .unwrap_or_default();
            println!(
                "    {}  {:>5}{}",
                point.at.format("%m/%d %I:%M%p"),
                format_american(point.price_american),
                line_point
            );
        }
    }

    Ok(())
}
