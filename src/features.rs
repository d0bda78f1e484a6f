//! Feature engineering: raw archive tables in, one row per (race, driver) out.
//!
//! Every stage takes the previous stage's rows by value or reference and
//! returns new rows; nothing is shared between runs. Any stage that leaves no
//! rows is a [`PipelineError::DataIntegrity`] naming that stage.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::archive::{RawDriver, RawQualifying, RawRace, RawResult, RawTables};
use crate::error::{PipelineError, Result};

const RACE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceRecord {
    pub race_id: u32,
    pub date: NaiveDate,
    pub year: i32,
    /// 1-based position of the race in date order.
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub race_id: u32,
    pub driver_id: u32,
    pub starting_position: u32,
    pub finish_position: u32,
    pub year: i32,
    pub race_order: u32,
    pub year_started: i32,
    /// Starts up to and including this race.
    pub experience_races: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifyingRow {
    pub race_id: u32,
    pub driver_id: u32,
    pub position: Option<u32>,
    pub q1: Option<String>,
    pub q2: Option<String>,
    pub q3: Option<String>,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub race_id: u32,
    pub driver_id: u32,
    pub race_order: u32,
    pub year: i32,
    pub starting_position: u32,
    pub finish_position: u32,
    pub experience_races: u32,
    pub experience_years: i32,
    pub qualifying_position: Option<u32>,
    pub nationality: Option<String>,
    pub q1_ms: u32,
    pub q2_ms: u32,
    pub q3_ms: u32,
    pub max_pace_ms: u32,
    pub mean_pace_ms: f64,
}

impl FeatureRow {
    /// Starting position, experience years, mean pace, max pace.
    pub fn predictors(&self) -> [f32; 4] {
        [
            self.starting_position as f32,
            self.experience_years as f32,
            self.mean_pace_ms as f32,
            self.max_pace_ms as f32,
        ]
    }

    /// Zero-indexed finish position.
    pub fn target_class(&self) -> u32 {
        self.finish_position.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The last `n` rows by chronological race order; input order breaks ties.
    pub fn most_recent(&self, n: usize) -> Vec<&FeatureRow> {
        let mut ordered: Vec<&FeatureRow> = self.rows.iter().collect();
        ordered.sort_by_key(|row| row.race_order);
        let skip = ordered.len().saturating_sub(n);
        ordered.split_off(skip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pace {
    pub max_ms: u32,
    pub mean_ms: f64,
}

/// Max over all three sessions; mean over the sessions that have a time.
pub fn session_pace(times: [u32; 3]) -> Pace {
    let max_ms = times.iter().copied().max().unwrap_or(0);
    let set: Vec<u32> = times.iter().copied().filter(|t| *t != 0).collect();
    let mean_ms = if set.is_empty() {
        0.0
    } else {
        set.iter().map(|t| f64::from(*t)).sum::<f64>() / set.len() as f64
    };
    Pace { max_ms, mean_ms }
}

/// Parse a qualifying time of the form `M:SS.mmm` into milliseconds.
/// The literal `0` is the absent-session marker and parses to 0.
pub fn parse_lap_time_ms(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw == "0" {
        return Some(0);
    }
    let parts: Vec<&str> = raw.split([':', '.']).collect();
    let [minutes, seconds, millis] = parts.as_slice() else {
        return None;
    };
    let minutes = minutes.trim().parse::<u32>().ok()?;
    let seconds = seconds.trim().parse::<u32>().ok()?;
    let millis = millis.trim().parse::<u32>().ok()?;
    minutes
        .checked_mul(60_000)?
        .checked_add(seconds.checked_mul(1_000)?)?
        .checked_add(millis)
}

/// Dedupe races by id (first listed wins), sort by date, number them from 1.
pub fn order_races(races: &[RawRace]) -> Result<Vec<RaceRecord>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(races.len());
    for race in races {
        if !seen.insert(race.race_id) {
            continue;
        }
        let date = NaiveDate::parse_from_str(race.date.trim(), RACE_DATE_FORMAT).map_err(|err| {
            PipelineError::DataIntegrity {
                stage: "race ordering",
                detail: format!("race {} has unreadable date {:?}: {err}", race.race_id, race.date),
            }
        })?;
        unique.push((race.race_id, date, race.year));
    }
    unique.sort_by_key(|(_, date, _)| *date);

    let ordered: Vec<RaceRecord> = unique
        .into_iter()
        .enumerate()
        .map(|(idx, (race_id, date, year))| RaceRecord {
            race_id,
            date,
            year,
            order: idx as u32 + 1,
        })
        .collect();
    ensure_rows("race ordering", ordered)
}

/// Attach race order and year to results, order them chronologically, and
/// derive each driver's first year and running start count.
pub fn build_result_rows(results: &[RawResult], races: &[RaceRecord]) -> Result<Vec<ResultRow>> {
    let by_id: HashMap<u32, &RaceRecord> = races.iter().map(|r| (r.race_id, r)).collect();

    let mut joined: Vec<(&RawResult, &RaceRecord)> = results
        .iter()
        .filter_map(|res| by_id.get(&res.race_id).map(|race| (res, *race)))
        .collect();
    let orphans = results.len() - joined.len();
    if orphans > 0 {
        debug!(orphans, "dropped results whose race is not in the races table");
    }
    if joined.is_empty() {
        return Err(PipelineError::empty_stage("race order join"));
    }
    joined.sort_by_key(|(_, race)| race.order);

    let mut year_started: HashMap<u32, i32> = HashMap::new();
    for (res, race) in &joined {
        year_started
            .entry(res.driver_id)
            .and_modify(|y| *y = (*y).min(race.year))
            .or_insert(race.year);
    }

    let mut starts: HashMap<u32, u32> = HashMap::new();
    let rows = joined
        .into_iter()
        .map(|(res, race)| {
            let count = starts.entry(res.driver_id).or_insert(0);
            *count += 1;
            ResultRow {
                race_id: res.race_id,
                driver_id: res.driver_id,
                starting_position: res.grid,
                finish_position: res.position_order,
                year: race.year,
                race_order: race.order,
                year_started: year_started.get(&res.driver_id).copied().unwrap_or(race.year),
                experience_races: *count,
            }
        })
        .collect();
    Ok(rows)
}

/// Attach race year to qualifying rows and keep those from `min_year` on.
pub fn build_qualifying_rows(
    qualifying: &[RawQualifying],
    races: &[RaceRecord],
    min_year: i32,
) -> Result<Vec<QualifyingRow>> {
    let years: HashMap<u32, i32> = races.iter().map(|r| (r.race_id, r.year)).collect();
    let rows = qualifying
        .iter()
        .filter_map(|q| {
            let year = *years.get(&q.race_id)?;
            (year >= min_year).then(|| QualifyingRow {
                race_id: q.race_id,
                driver_id: q.driver_id,
                position: q.position,
                q1: q.q1.clone(),
                q2: q.q2.clone(),
                q3: q.q3.clone(),
                year,
            })
        })
        .collect();
    ensure_rows("qualifying era filter", rows)
}

pub fn build_feature_table(raw: &RawTables, min_year: i32) -> Result<FeatureTable> {
    let races = order_races(&raw.races)?;
    let results = build_result_rows(&raw.results, &races)?;
    let qualifying = build_qualifying_rows(&raw.qualifying, &races, min_year)?;
    join_features(results, &qualifying, &raw.drivers, min_year)
}

/// Filter results to the era, to started races and to races with qualifying
/// data, then join qualifying and nationality and derive pace.
pub fn join_features(
    results: Vec<ResultRow>,
    qualifying: &[QualifyingRow],
    drivers: &[RawDriver],
    min_year: i32,
) -> Result<FeatureTable> {
    let total = results.len();
    let results = ensure_rows(
        "results era filter",
        results.into_iter().filter(|r| r.year >= min_year).collect(),
    )?;
    let in_era = results.len();
    let results = ensure_rows(
        "grid filter",
        results
            .into_iter()
            .filter(|r| r.starting_position != 0)
            .collect(),
    )?;
    let started = results.len();

    let qualified_races: HashSet<u32> = qualifying.iter().map(|q| q.race_id).collect();
    let results = ensure_rows(
        "qualifying coverage",
        results
            .into_iter()
            .filter(|r| qualified_races.contains(&r.race_id))
            .collect(),
    )?;
    let covered = results.len();

    let mut by_key: HashMap<(u32, u32), &QualifyingRow> = HashMap::new();
    for q in qualifying {
        by_key.entry((q.race_id, q.driver_id)).or_insert(q);
    }
    let nationality: HashMap<u32, &str> = drivers
        .iter()
        .filter_map(|d| d.nationality.as_deref().map(|n| (d.driver_id, n)))
        .collect();

    let mut rows = Vec::with_capacity(results.len());
    for res in results {
        let Some(quali) = by_key.get(&(res.race_id, res.driver_id)) else {
            continue;
        };
        let Some(q1) = quali.q1.as_deref() else {
            continue;
        };
        let times = [
            session_ms(&res, Some(q1))?,
            session_ms(&res, quali.q2.as_deref())?,
            session_ms(&res, quali.q3.as_deref())?,
        ];
        let pace = session_pace(times);
        rows.push(FeatureRow {
            race_id: res.race_id,
            driver_id: res.driver_id,
            race_order: res.race_order,
            year: res.year,
            starting_position: res.starting_position,
            finish_position: res.finish_position,
            experience_races: res.experience_races,
            experience_years: res.year - res.year_started,
            qualifying_position: quali.position,
            nationality: nationality.get(&res.driver_id).map(|n| n.to_string()),
            q1_ms: times[0],
            q2_ms: times[1],
            q3_ms: times[2],
            max_pace_ms: pace.max_ms,
            mean_pace_ms: pace.mean_ms,
        });
    }
    let rows = ensure_rows("q1 filter", rows)?;

    info!(
        total,
        in_era,
        started,
        covered,
        features = rows.len(),
        "built feature table"
    );
    Ok(FeatureTable::new(rows))
}

fn session_ms(row: &ResultRow, raw: Option<&str>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    parse_lap_time_ms(raw).ok_or_else(|| PipelineError::DataIntegrity {
        stage: "lap time parsing",
        detail: format!(
            "race {} driver {} has malformed lap time {raw:?}",
            row.race_id, row.driver_id
        ),
    })
}

fn ensure_rows<T>(stage: &'static str, rows: Vec<T>) -> Result<Vec<T>> {
    if rows.is_empty() {
        return Err(PipelineError::empty_stage(stage));
    }
    debug!(stage, rows = rows.len(), "stage complete");
    Ok(rows)
}
