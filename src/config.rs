use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ARCHIVE_URL: &str = "https://ergast.com/downloads/f1db_csv.zip";
pub const DEFAULT_HYBRID_ERA_START: i32 = 2014;
pub const DEFAULT_CV_FOLDS: usize = 10;
pub const DEFAULT_PREDICTION_WINDOW: usize = 20;
pub const DEFAULT_FORECAST_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

const CACHE_DIR: &str = "f1_forecast";

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveSource {
    Remote(String),
    Directory(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoosterParams {
    pub iterations: usize,
    pub max_depth: u32,
    pub shrinkage: f32,
    pub min_leaf_size: usize,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            iterations: 40,
            max_depth: 4,
            shrinkage: 0.1,
            min_leaf_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub folds: usize,
    /// `None` keeps rows of each class in table order when dealing folds.
    pub shuffle_seed: Option<u64>,
    pub booster: BoosterParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            folds: DEFAULT_CV_FOLDS,
            shuffle_seed: None,
            booster: BoosterParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub source: ArchiveSource,
    pub hybrid_era_start: i32,
    pub prediction_window: usize,
    pub trainer: TrainerConfig,
    pub forecast_ttl: Duration,
    pub http_timeout: Duration,
    pub ledger_db: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: ArchiveSource::Remote(DEFAULT_ARCHIVE_URL.to_string()),
            hybrid_era_start: DEFAULT_HYBRID_ERA_START,
            prediction_window: DEFAULT_PREDICTION_WINDOW,
            trainer: TrainerConfig::default(),
            forecast_ttl: Duration::from_secs(DEFAULT_FORECAST_TTL_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            ledger_db: app_cache_dir().map(|dir| dir.join("forecast_runs.sqlite")),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let source = match (non_empty("F1_ARCHIVE_DIR"), non_empty("F1_ARCHIVE_URL")) {
            (Some(dir), _) => ArchiveSource::Directory(PathBuf::from(dir)),
            (None, Some(url)) => ArchiveSource::Remote(url),
            (None, None) => defaults.source,
        };

        let hybrid_era_start = non_empty("F1_HYBRID_ERA_START")
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults.hybrid_era_start);
        let prediction_window = non_empty("F1_PREDICTION_WINDOW")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.prediction_window)
            .max(1);
        let folds = non_empty("F1_CV_FOLDS")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.trainer.folds)
            .max(2);
        let shuffle_seed = non_empty("F1_CV_SEED").and_then(|v| v.parse::<u64>().ok());

        let booster_defaults = defaults.trainer.booster;
        let booster = BoosterParams {
            iterations: non_empty("F1_GBDT_ITERATIONS")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(booster_defaults.iterations)
                .max(1),
            max_depth: non_empty("F1_GBDT_MAX_DEPTH")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(booster_defaults.max_depth)
                .max(1),
            shrinkage: non_empty("F1_GBDT_SHRINKAGE")
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(booster_defaults.shrinkage),
            min_leaf_size: non_empty("F1_GBDT_MIN_LEAF")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(booster_defaults.min_leaf_size)
                .max(1),
        };

        let forecast_ttl = non_empty("F1_FORECAST_TTL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.forecast_ttl);
        let http_timeout = non_empty("F1_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs.max(5)))
            .unwrap_or(defaults.http_timeout);
        let ledger_db = non_empty("F1_LEDGER_DB")
            .map(PathBuf::from)
            .or(defaults.ledger_db);

        Self {
            source,
            hybrid_era_start,
            prediction_window,
            trainer: TrainerConfig {
                folds,
                shuffle_seed,
                booster,
            },
            forecast_ttl,
            http_timeout,
            ledger_db,
        }
    }
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> PipelineConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.source, ArchiveSource::Remote(DEFAULT_ARCHIVE_URL.to_string()));
        assert_eq!(cfg.hybrid_era_start, 2014);
        assert_eq!(cfg.prediction_window, 20);
        assert_eq!(cfg.trainer.folds, 10);
        assert_eq!(cfg.trainer.shuffle_seed, None);
        assert_eq!(cfg.forecast_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn directory_source_wins_over_url() {
        let cfg = config_from(&[
            ("F1_ARCHIVE_URL", "https://example.test/f1.zip"),
            ("F1_ARCHIVE_DIR", "/data/f1db_csv"),
        ]);
        assert_eq!(cfg.source, ArchiveSource::Directory(PathBuf::from("/data/f1db_csv")));
    }

    #[test]
    fn numeric_overrides_are_clamped_and_bad_values_ignored() {
        let cfg = config_from(&[
            ("F1_CV_FOLDS", "1"),
            ("F1_PREDICTION_WINDOW", "0"),
            ("F1_CV_SEED", "42"),
            ("F1_GBDT_SHRINKAGE", "-3"),
            ("F1_HYBRID_ERA_START", "soon"),
        ]);
        assert_eq!(cfg.trainer.folds, 2);
        assert_eq!(cfg.prediction_window, 1);
        assert_eq!(cfg.trainer.shuffle_seed, Some(42));
        assert_eq!(cfg.trainer.booster.shrinkage, BoosterParams::default().shrinkage);
        assert_eq!(cfg.hybrid_era_start, 2014);
    }
}
