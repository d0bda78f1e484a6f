use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Label substituted when a driver id has no display code in the drivers table.
pub const UNKNOWN_DRIVER: &str = "Unknown Driver";

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Remote fetch, archive or CSV decoding failed.
    #[error("data acquisition failed: {0}")]
    DataAcquisition(String),

    /// A join or filter stage left nothing to work with, or a value in the
    /// archive could not be interpreted.
    #[error("data integrity failure at {stage}: {detail}")]
    DataIntegrity { stage: &'static str, detail: String },

    #[error("insufficient data for {operation}: need {needed} rows, have {available}")]
    InsufficientData {
        operation: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
}

impl PipelineError {
    pub fn acquisition(err: anyhow::Error) -> Self {
        Self::DataAcquisition(format!("{err:#}"))
    }

    pub fn empty_stage(stage: &'static str) -> Self {
        Self::DataIntegrity {
            stage,
            detail: "no rows left after this step".to_string(),
        }
    }

    /// Fatal errors abort the run; callers surface them as a degraded state.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataAcquisition(_) => "data_acquisition",
            Self::DataIntegrity { .. } => "data_integrity",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::ModelUnavailable(_) => "model_unavailable",
        }
    }
}
