use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::archive::{self, RawTables};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::features::build_feature_table;
use crate::ranker::{DriverCodes, DriverPrediction, rank_predictions};
use crate::trainer::train;

/// The ranked forecast handed to the web layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub rankings: Vec<DriverPrediction>,
    pub accuracy_percent: u8,
    pub generated_at: String,
    pub training_rows: usize,
    pub window_rows: usize,
    #[serde(default)]
    pub unknown_drivers: usize,
    #[serde(default)]
    pub archive_fingerprint: String,
}

/// Acquire, engineer, train and rank using configuration from the
/// environment. Blocks for as long as the download and the fit take.
pub fn get_race_predictions() -> Result<Forecast> {
    let config = PipelineConfig::from_env();
    get_race_predictions_with(&config)
}

pub fn get_race_predictions_with(config: &PipelineConfig) -> Result<Forecast> {
    let raw = archive::acquire(config)?;
    run_pipeline(&raw, config)
}

/// Everything after acquisition. Pure in `raw` and `config`.
pub fn run_pipeline(raw: &RawTables, config: &PipelineConfig) -> Result<Forecast> {
    let table = build_feature_table(raw, config.hybrid_era_start)?;
    let (model, accuracy_percent) = train(&table, &config.trainer)?;
    let codes = DriverCodes::from_drivers(&raw.drivers);
    let ranking = rank_predictions(&model, &table, &codes, config.prediction_window)?;

    info!(
        drivers = ranking.predictions.len(),
        accuracy_percent,
        unknown_drivers = ranking.unknown_drivers,
        "forecast ready"
    );
    Ok(Forecast {
        rankings: ranking.predictions,
        accuracy_percent,
        generated_at: Utc::now().to_rfc3339(),
        training_rows: table.len(),
        window_rows: ranking.window_rows,
        unknown_drivers: ranking.unknown_drivers,
        archive_fingerprint: raw.fingerprint.clone(),
    })
}
