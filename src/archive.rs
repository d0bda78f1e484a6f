//! Raw table acquisition.
//!
//! The dataset is the Ergast-style `f1db_csv` dump: one CSV file per table,
//! either zipped behind a URL or unpacked in a local directory. Only the four
//! tables the forecast needs are read, and only the columns it uses are
//! decoded. The archive writes missing values as `\N`; those become `None`
//! here so later stages never see the sentinel.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{Context, Result as AnyResult, anyhow};
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::archive_cache::{ArchiveCache, fetch_bytes_cached};
use crate::config::{ArchiveSource, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::http_client::http_client;

pub const DRIVERS_CSV: &str = "drivers.csv";
pub const RACES_CSV: &str = "races.csv";
pub const RESULTS_CSV: &str = "results.csv";
pub const QUALIFYING_CSV: &str = "qualifying.csv";

pub const TABLE_FILES: [&str; 4] = [DRIVERS_CSV, RACES_CSV, RESULTS_CSV, QUALIFYING_CSV];

const MISSING_SENTINEL: &str = "\\N";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDriver {
    #[serde(rename = "driverId")]
    pub driver_id: u32,
    #[serde(default, deserialize_with = "nullable_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "nullable_string")]
    pub nationality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRace {
    #[serde(rename = "raceId")]
    pub race_id: u32,
    pub year: i32,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawResult {
    #[serde(rename = "raceId")]
    pub race_id: u32,
    #[serde(rename = "driverId")]
    pub driver_id: u32,
    pub grid: u32,
    #[serde(rename = "positionOrder")]
    pub position_order: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawQualifying {
    #[serde(rename = "raceId")]
    pub race_id: u32,
    #[serde(rename = "driverId")]
    pub driver_id: u32,
    #[serde(default, deserialize_with = "nullable_u32")]
    pub position: Option<u32>,
    #[serde(default, deserialize_with = "nullable_string")]
    pub q1: Option<String>,
    #[serde(default, deserialize_with = "nullable_string")]
    pub q2: Option<String>,
    #[serde(default, deserialize_with = "nullable_string")]
    pub q3: Option<String>,
}

/// The four source tables of one acquisition, in archive row order.
#[derive(Debug, Clone, Default)]
pub struct RawTables {
    pub drivers: Vec<RawDriver>,
    pub races: Vec<RawRace>,
    pub results: Vec<RawResult>,
    pub qualifying: Vec<RawQualifying>,
    /// SHA-256 hex of the source bytes.
    pub fingerprint: String,
}

impl RawTables {
    /// Parse the four tables from their CSV text.
    pub fn from_csv_texts(
        drivers: &str,
        races: &str,
        results: &str,
        qualifying: &str,
    ) -> Result<Self> {
        let mut hasher = Sha256::new();
        for text in [drivers, races, results, qualifying] {
            hasher.update(text.as_bytes());
        }
        Ok(Self {
            drivers: parse_table(DRIVERS_CSV, drivers).map_err(PipelineError::acquisition)?,
            races: parse_table(RACES_CSV, races).map_err(PipelineError::acquisition)?,
            results: parse_table(RESULTS_CSV, results).map_err(PipelineError::acquisition)?,
            qualifying: parse_table(QUALIFYING_CSV, qualifying)
                .map_err(PipelineError::acquisition)?,
            fingerprint: hex_digest(hasher),
        })
    }
}

/// Acquire raw tables from whatever source the configuration names.
pub fn acquire(config: &PipelineConfig) -> Result<RawTables> {
    match &config.source {
        ArchiveSource::Directory(dir) => load_directory(dir),
        ArchiveSource::Remote(url) => {
            let bytes = download_archive(url, config).map_err(PipelineError::acquisition)?;
            load_zip(&bytes)
        }
    }
}

pub fn download_archive(url: &str, config: &PipelineConfig) -> AnyResult<Vec<u8>> {
    let client = http_client(config.http_timeout)?;
    let cache = ArchiveCache::default_location();
    fetch_bytes_cached(client, url, cache.as_ref())
        .with_context(|| format!("download archive {url}"))
}

pub fn load_directory(dir: &Path) -> Result<RawTables> {
    let texts = read_directory_tables(dir).map_err(PipelineError::acquisition)?;
    let tables = RawTables::from_csv_texts(&texts[0], &texts[1], &texts[2], &texts[3])?;
    log_tables("directory", &tables);
    Ok(tables)
}

fn read_directory_tables(dir: &Path) -> AnyResult<[String; 4]> {
    let read = |name: &str| -> AnyResult<String> {
        let path = dir.join(name);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    };
    Ok([
        read(DRIVERS_CSV)?,
        read(RACES_CSV)?,
        read(RESULTS_CSV)?,
        read(QUALIFYING_CSV)?,
    ])
}

pub fn load_zip(bytes: &[u8]) -> Result<RawTables> {
    let texts = extract_tables(bytes).map_err(PipelineError::acquisition)?;
    let mut tables = RawTables::from_csv_texts(&texts[0], &texts[1], &texts[2], &texts[3])?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    tables.fingerprint = hex_digest(hasher);
    log_tables("zip", &tables);
    Ok(tables)
}

/// Pull the four table files out of a zip, in `TABLE_FILES` order.
/// Entries may sit inside a top-level folder.
pub fn extract_tables(bytes: &[u8]) -> AnyResult<[String; 4]> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).context("open zip archive")?;

    let mut found: [Option<String>; 4] = [None, None, None, None];
    for idx in 0..zip.len() {
        let mut entry = zip
            .by_index(idx)
            .with_context(|| format!("read zip entry {idx}"))?;
        if entry.is_dir() {
            continue;
        }
        let file_name = entry
            .name()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let Some(slot) = TABLE_FILES.iter().position(|t| *t == file_name) else {
            continue;
        };
        if found[slot].is_some() {
            continue;
        }
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .with_context(|| format!("decode {file_name}"))?;
        found[slot] = Some(text);
    }

    let [drivers, races, results, qualifying] = found;
    let missing = |name: &str| anyhow!("archive has no {name}");
    Ok([
        drivers.ok_or_else(|| missing(DRIVERS_CSV))?,
        races.ok_or_else(|| missing(RACES_CSV))?,
        results.ok_or_else(|| missing(RESULTS_CSV))?,
        qualifying.ok_or_else(|| missing(QUALIFYING_CSV))?,
    ])
}

fn parse_table<T: for<'de> Deserialize<'de>>(name: &str, text: &str) -> AnyResult<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut out = Vec::new();
    for (idx, row) in reader.deserialize::<T>().enumerate() {
        // +2: header line and 1-based numbering.
        out.push(row.with_context(|| format!("{name} line {}", idx + 2))?);
    }
    Ok(out)
}

fn log_tables(source: &str, tables: &RawTables) {
    info!(
        source,
        drivers = tables.drivers.len(),
        races = tables.races.len(),
        results = tables.results.len(),
        qualifying = tables.qualifying.len(),
        fingerprint = %tables.fingerprint,
        "loaded raw tables"
    );
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed == MISSING_SENTINEL
}

fn nullable_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !is_missing(v)).map(|v| v.trim().to_string()))
}

fn nullable_u32<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(v) if !is_missing(&v) => v
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(<D::Error as serde::de::Error>::custom),
        _ => Ok(None),
    }
}
