//! Caller-side memoization of forecasts.
//!
//! The pipeline itself never caches; consumers that serve the forecast on
//! every request keep it here for a bounded time instead of re-running the
//! download and fit.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::config::app_cache_dir;
use crate::error::Result;
use crate::forecast::Forecast;

const SNAPSHOT_FILE: &str = "forecast.json";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug)]
pub struct ForecastCache {
    ttl: Duration,
    entry: Option<(Instant, Forecast)>,
}

impl ForecastCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    pub fn get(&self) -> Option<&Forecast> {
        self.entry
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, forecast)| forecast)
    }

    pub fn put(&mut self, forecast: Forecast) {
        self.entry = Some((Instant::now(), forecast));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Cached forecast while fresh, else `refresh()`. Failures are not cached,
    /// so the next call retries.
    pub fn get_or_refresh(&mut self, refresh: impl FnOnce() -> Result<Forecast>) -> Result<Forecast> {
        if let Some(forecast) = self.get() {
            return Ok(forecast.clone());
        }
        let forecast = refresh()?;
        self.put(forecast.clone());
        Ok(forecast)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    saved_at: u64,
    forecast: Forecast,
}

pub fn default_snapshot_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(SNAPSHOT_FILE))
}

/// Load a snapshot no older than `ttl`. Missing, stale, unreadable or
/// other-version snapshots all read as `None`.
pub fn load_snapshot(path: &Path, ttl: Duration) -> Option<Forecast> {
    let raw = fs::read_to_string(path).ok()?;
    let snapshot = serde_json::from_str::<SnapshotFile>(&raw).ok()?;
    if snapshot.version != SNAPSHOT_VERSION {
        return None;
    }
    let now = system_time_to_secs(SystemTime::now())?;
    if now.saturating_sub(snapshot.saved_at) >= ttl.as_secs() {
        return None;
    }
    Some(snapshot.forecast)
}

pub fn save_snapshot(path: &Path, forecast: &Forecast) -> AnyResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let snapshot = SnapshotFile {
        version: SNAPSHOT_VERSION,
        saved_at: system_time_to_secs(SystemTime::now()).unwrap_or_default(),
        forecast: forecast.clone(),
    };
    let json = serde_json::to_string_pretty(&snapshot).context("serialize forecast snapshot")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).context("write forecast snapshot")?;
    fs::rename(&tmp, path).context("swap forecast snapshot")?;
    Ok(())
}

fn system_time_to_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}
