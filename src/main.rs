use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use f1_forecast::cache::{default_snapshot_path, load_snapshot, save_snapshot};
use f1_forecast::forecast::{Forecast, get_race_predictions_with};
use f1_forecast::{PipelineConfig, ledger};

fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` means the forecast was unavailable and a degraded message
/// was printed.
fn run() -> Result<bool> {
    let config = PipelineConfig::from_env();
    let refresh = has_flag("--refresh");
    let as_json = has_flag("--json");

    let snapshot_path = default_snapshot_path();
    if !refresh {
        if let Some(forecast) = snapshot_path
            .as_deref()
            .and_then(|path| load_snapshot(path, config.forecast_ttl))
        {
            print_forecast(&forecast, as_json, true)?;
            return Ok(true);
        }
    }

    let conn = match config.ledger_db.as_deref().map(ledger::open_db).transpose() {
        Ok(conn) => conn,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "run ledger unavailable");
            None
        }
    };
    let tracker = ledger::RunTracker::start(conn.as_ref(), &Utc::now().to_rfc3339());

    match get_race_predictions_with(&config) {
        Ok(forecast) => {
            tracker.succeeded(&Utc::now().to_rfc3339(), &forecast);
            if let Some(path) = snapshot_path.as_deref() {
                if let Err(err) = save_snapshot(path, &forecast) {
                    warn!(error = %format!("{err:#}"), "could not save forecast snapshot");
                }
            }
            print_forecast(&forecast, as_json, false)?;
            Ok(true)
        }
        Err(err) => {
            println!("Predictions unavailable ({}): {err}", err.kind());
            tracker.failed(&Utc::now().to_rfc3339(), &err.to_string());
            Ok(false)
        }
    }
}

fn print_forecast(forecast: &Forecast, as_json: bool, from_snapshot: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(forecast)?);
        return Ok(());
    }

    println!("Predicted finishing order");
    for p in &forecast.rankings {
        println!("{:>3}  {}", p.rank, p.driver);
    }
    println!(
        "Cross-validated accuracy: {}% ({} training rows, {} in window)",
        forecast.accuracy_percent, forecast.training_rows, forecast.window_rows
    );
    if forecast.unknown_drivers > 0 {
        println!("Drivers without a code: {}", forecast.unknown_drivers);
    }
    println!(
        "Generated: {}{}",
        forecast.generated_at,
        if from_snapshot { " (cached)" } else { "" }
    );
    Ok(())
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == flag)
}
