//! Race-finish forecasting from the historical F1 results archive.
//!
//! The pipeline runs as one blocking call chain:
//! acquisition ([`archive`]) -> feature engineering ([`features`]) ->
//! training ([`trainer`]) -> ranking ([`ranker`]), wrapped by
//! [`forecast::get_race_predictions`].
//!
//! ```no_run
//! let forecast = f1_forecast::get_race_predictions()?;
//! for p in &forecast.rankings {
//!     println!("{:>2} {}", p.rank, p.driver);
//! }
//! println!("cv accuracy {}%", forecast.accuracy_percent);
//! # Ok::<(), f1_forecast::PipelineError>(())
//! ```

pub mod archive;
pub mod archive_cache;
pub mod cache;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod http_client;
pub mod ledger;
pub mod ranker;
pub mod trainer;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result, UNKNOWN_DRIVER};
pub use features::{FeatureRow, FeatureTable, build_feature_table};
pub use forecast::{Forecast, get_race_predictions, run_pipeline};
pub use ranker::{DriverPrediction, assign_ranks, rank_predictions};
pub use trainer::{FinishClassifier, TrainedModel, train};
