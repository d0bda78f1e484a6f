use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::warn;

use crate::forecast::Forecast;
use crate::ranker::DriverPrediction;

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub archive_fingerprint: Option<String>,
    pub training_rows: Option<i64>,
    pub accuracy_percent: Option<i64>,
    pub rankings: Vec<DriverPrediction>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "succeeded" => RunStatus::Succeeded,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS forecast_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            status TEXT NOT NULL,
            archive_fingerprint TEXT NULL,
            training_rows INTEGER NULL,
            accuracy_percent INTEGER NULL,
            rankings_json TEXT NOT NULL DEFAULT '[]',
            error TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_forecast_runs_started ON forecast_runs(started_at);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

pub fn start_run(conn: &Connection, started_at: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO forecast_runs(started_at, status) VALUES (?1, ?2)",
        params![started_at, RunStatus::Running.as_str()],
    )
    .context("insert forecast run")?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_run(conn: &Connection, run_id: i64, finished_at: &str, forecast: &Forecast) -> Result<()> {
    let rankings_json =
        serde_json::to_string(&forecast.rankings).context("serialize rankings")?;
    conn.execute(
        "UPDATE forecast_runs
         SET finished_at = ?1, status = ?2, archive_fingerprint = ?3, training_rows = ?4,
             accuracy_percent = ?5, rankings_json = ?6
         WHERE run_id = ?7",
        params![
            finished_at,
            RunStatus::Succeeded.as_str(),
            forecast.archive_fingerprint,
            forecast.training_rows as i64,
            i64::from(forecast.accuracy_percent),
            rankings_json,
            run_id
        ],
    )
    .context("update forecast run")?;
    Ok(())
}

pub fn fail_run(conn: &Connection, run_id: i64, finished_at: &str, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE forecast_runs SET finished_at = ?1, status = ?2, error = ?3 WHERE run_id = ?4",
        params![finished_at, RunStatus::Failed.as_str(), error, run_id],
    )
    .context("update failed forecast run")?;
    Ok(())
}

pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRecord>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT run_id, started_at, finished_at, status, archive_fingerprint,
                   training_rows, accuracy_percent, rankings_json, error
            FROM forecast_runs
            ORDER BY run_id DESC
            LIMIT ?1
            "#,
        )
        .context("prepare recent runs query")?;

    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })
        .context("query recent runs")?;

    let mut out = Vec::new();
    for row in rows {
        let (run_id, started_at, finished_at, status, fingerprint, training_rows, accuracy, rankings_json, error) =
            row.context("decode forecast run row")?;
        let rankings = serde_json::from_str::<Vec<DriverPrediction>>(&rankings_json)
            .with_context(|| format!("decode rankings of run {run_id}"))?;
        out.push(RunRecord {
            run_id,
            started_at,
            finished_at,
            status: RunStatus::parse(&status),
            archive_fingerprint: fingerprint,
            training_rows,
            accuracy_percent: accuracy,
            rankings,
            error,
        });
    }
    Ok(out)
}

/// Best-effort ledger bookkeeping for one forecast run. Write failures are
/// logged and never reach the caller, so a broken ledger cannot hide the
/// forecast or its degraded message.
pub struct RunTracker<'a> {
    conn: Option<&'a Connection>,
    run_id: Option<i64>,
}

impl<'a> RunTracker<'a> {
    pub fn start(conn: Option<&'a Connection>, started_at: &str) -> Self {
        let run_id = conn.and_then(|conn| match start_run(conn, started_at) {
            Ok(run_id) => Some(run_id),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not record forecast run start");
                None
            }
        });
        Self { conn, run_id }
    }

    pub fn run_id(&self) -> Option<i64> {
        self.run_id
    }

    pub fn succeeded(&self, finished_at: &str, forecast: &Forecast) {
        if let (Some(conn), Some(run_id)) = (self.conn, self.run_id) {
            if let Err(err) = finish_run(conn, run_id, finished_at, forecast) {
                warn!(run_id, error = %format!("{err:#}"), "could not record forecast run");
            }
        }
    }

    pub fn failed(&self, finished_at: &str, error: &str) {
        if let (Some(conn), Some(run_id)) = (self.conn, self.run_id) {
            if let Err(err) = fail_run(conn, run_id, finished_at, error) {
                warn!(run_id, error = %format!("{err:#}"), "could not record failed forecast run");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        init_schema(&conn).expect("schema");
        conn
    }

    fn forecast() -> Forecast {
        Forecast {
            rankings: vec![DriverPrediction {
                driver: "LEC".to_string(),
                rank: 1,
            }],
            accuracy_percent: 21,
            generated_at: "2024-05-26T14:00:00+00:00".to_string(),
            training_rows: 120,
            window_rows: 1,
            unknown_drivers: 0,
            archive_fingerprint: "feed".to_string(),
        }
    }

    #[test]
    fn successful_run_is_recorded_with_rankings() {
        let conn = memory_db();
        let run_id = start_run(&conn, "2024-05-26T13:59:00+00:00").expect("start");
        finish_run(&conn, run_id, "2024-05-26T14:00:00+00:00", &forecast()).expect("finish");

        let runs = recent_runs(&conn, 5).expect("runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        assert_eq!(runs[0].accuracy_percent, Some(21));
        assert_eq!(runs[0].training_rows, Some(120));
        assert_eq!(runs[0].rankings, forecast().rankings);
        assert_eq!(runs[0].archive_fingerprint.as_deref(), Some("feed"));
    }

    #[test]
    fn failed_run_keeps_error_and_newest_comes_first() {
        let conn = memory_db();
        let first = start_run(&conn, "2024-05-26T13:00:00+00:00").expect("start");
        fail_run(&conn, first, "2024-05-26T13:01:00+00:00", "data acquisition failed").expect("fail");
        let second = start_run(&conn, "2024-05-26T14:00:00+00:00").expect("start");

        let runs = recent_runs(&conn, 10).expect("runs");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, second);
        assert_eq!(runs[0].status, RunStatus::Running);
        assert_eq!(runs[1].status, RunStatus::Failed);
        assert_eq!(runs[1].error.as_deref(), Some("data acquisition failed"));
        assert!(runs[1].rankings.is_empty());
    }

    #[test]
    fn tracker_records_outcome_through_the_ledger() {
        let conn = memory_db();
        let tracker = RunTracker::start(Some(&conn), "2024-05-26T13:00:00+00:00");
        assert!(tracker.run_id().is_some());
        tracker.failed("2024-05-26T13:01:00+00:00", "model unavailable");

        let runs = recent_runs(&conn, 1).expect("runs");
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn tracker_swallows_ledger_write_failures() {
        // No schema: the start insert fails.
        let bare = Connection::open_in_memory().expect("in-memory db");
        let tracker = RunTracker::start(Some(&bare), "2024-05-26T13:00:00+00:00");
        assert_eq!(tracker.run_id(), None);
        tracker.failed("2024-05-26T13:01:00+00:00", "data acquisition failed");
        tracker.succeeded("2024-05-26T13:01:00+00:00", &forecast());

        // Table dropped after the run started: the final update fails.
        let conn = memory_db();
        let tracker = RunTracker::start(Some(&conn), "2024-05-26T13:00:00+00:00");
        assert!(tracker.run_id().is_some());
        conn.execute_batch("DROP TABLE forecast_runs;").expect("drop table");
        tracker.failed("2024-05-26T13:01:00+00:00", "data acquisition failed");
        tracker.succeeded("2024-05-26T13:01:00+00:00", &forecast());

        let disabled = RunTracker::start(None, "2024-05-26T13:00:00+00:00");
        assert_eq!(disabled.run_id(), None);
        disabled.failed("2024-05-26T13:01:00+00:00", "ignored");
    }
}
