use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::archive::RawDriver;
use crate::error::{PipelineError, Result, UNKNOWN_DRIVER};
use crate::features::FeatureTable;
use crate::trainer::{FinishClassifier, Predictors};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverPrediction {
    pub driver: String,
    pub rank: u32,
}

/// driverId -> display code, e.g. 1 -> "HAM".
#[derive(Debug, Clone, Default)]
pub struct DriverCodes {
    codes: HashMap<u32, String>,
}

impl DriverCodes {
    pub fn from_drivers(drivers: &[RawDriver]) -> Self {
        let mut codes = HashMap::new();
        for driver in drivers {
            if let Some(code) = driver.code.as_ref() {
                codes.entry(driver.driver_id).or_insert_with(|| code.clone());
            }
        }
        Self { codes }
    }

    pub fn get(&self, driver_id: u32) -> Option<&str> {
        self.codes.get(&driver_id).map(String::as_str)
    }

    /// Display code, or the unknown-driver label.
    pub fn display(&self, driver_id: u32) -> &str {
        self.get(driver_id).unwrap_or(UNKNOWN_DRIVER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranking {
    pub predictions: Vec<DriverPrediction>,
    pub window_rows: usize,
    pub unknown_drivers: usize,
}

/// Stable-sort by predicted position, then renumber 1..N. Equal predictions
/// keep their input order.
pub fn assign_ranks(predicted: Vec<(String, u32)>) -> Vec<DriverPrediction> {
    let mut predicted = predicted;
    predicted.sort_by_key(|(_, position)| *position);
    predicted
        .into_iter()
        .enumerate()
        .map(|(idx, (driver, _))| DriverPrediction {
            driver,
            rank: idx as u32 + 1,
        })
        .collect()
}

/// Predict finish positions for the most recent `window` rows and rank them.
pub fn rank_predictions<M: FinishClassifier + ?Sized>(
    model: &M,
    table: &FeatureTable,
    codes: &DriverCodes,
    window: usize,
) -> Result<Ranking> {
    if table.is_empty() {
        return Err(PipelineError::InsufficientData {
            operation: "ranking",
            needed: 1,
            available: 0,
        });
    }
    if !model.is_fitted() {
        return Err(PipelineError::ModelUnavailable(
            "classifier has no fitted classes".to_string(),
        ));
    }

    let recent = table.most_recent(window);
    if recent.len() < window {
        warn!(
            window,
            available = recent.len(),
            "fewer rows than the prediction window, ranking what exists"
        );
    }

    let predictors: Vec<Predictors> = recent.iter().map(|row| row.predictors()).collect();
    let classes = model.predict_classes(&predictors);
    if classes.len() != recent.len() {
        return Err(PipelineError::ModelUnavailable(format!(
            "classifier returned {} predictions for {} rows",
            classes.len(),
            recent.len()
        )));
    }

    let mut unknown_drivers = 0;
    let predicted: Vec<(String, u32)> = recent
        .iter()
        .zip(classes)
        .map(|(row, class)| {
            if codes.get(row.driver_id).is_none() {
                warn!(driver_id = row.driver_id, "no display code for driver");
                unknown_drivers += 1;
            }
            (codes.display(row.driver_id).to_string(), class + 1)
        })
        .collect();

    Ok(Ranking {
        predictions: assign_ranks(predicted),
        window_rows: recent.len(),
        unknown_drivers,
    })
}
