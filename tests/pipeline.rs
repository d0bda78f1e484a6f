use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use zip::write::SimpleFileOptions;

use f1_forecast::archive::{TABLE_FILES, load_directory, load_zip};
use f1_forecast::config::{ArchiveSource, BoosterParams, TrainerConfig};
use f1_forecast::forecast::get_race_predictions_with;
use f1_forecast::{PipelineConfig, PipelineError, run_pipeline};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/f1db")
}

fn small_config() -> PipelineConfig {
    PipelineConfig {
        source: ArchiveSource::Directory(fixture_dir()),
        prediction_window: 5,
        trainer: TrainerConfig {
            folds: 3,
            shuffle_seed: None,
            booster: BoosterParams {
                iterations: 5,
                max_depth: 2,
                shrinkage: 0.3,
                min_leaf_size: 1,
            },
        },
        ledger_db: None,
        ..PipelineConfig::default()
    }
}

fn fixture_zip(prefix: &str, skip: Option<&str>) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    if !prefix.is_empty() {
        writer
            .add_directory(prefix, options)
            .expect("add directory");
    }
    for name in TABLE_FILES {
        if Some(name) == skip {
            continue;
        }
        let text = fs::read(fixture_dir().join(name)).expect("read fixture");
        writer
            .start_file(format!("{prefix}{name}"), options)
            .expect("start entry");
        writer.write_all(&text).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

#[test]
fn fixture_pipeline_produces_a_full_ranking() {
    let config = small_config();
    let raw = load_directory(&fixture_dir()).expect("fixture tables should load");
    let forecast = run_pipeline(&raw, &config).expect("pipeline should run");

    assert_eq!(forecast.training_rows, 12);
    assert_eq!(forecast.window_rows, 5);
    assert_eq!(forecast.rankings.len(), 5);
    assert!(forecast.accuracy_percent <= 100);
    assert_eq!(forecast.unknown_drivers, 1);
    assert_eq!(forecast.archive_fingerprint, raw.fingerprint);
    assert!(!forecast.generated_at.is_empty());

    let mut ranks: Vec<u32> = forecast.rankings.iter().map(|p| p.rank).collect();
    ranks.sort_unstable();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);

    let mut drivers: Vec<&str> = forecast.rankings.iter().map(|p| p.driver.as_str()).collect();
    drivers.sort_unstable();
    assert_eq!(drivers, vec!["ALO", "HAM", "ROS", "Unknown Driver", "VET"]);
}

#[test]
fn repeated_runs_agree() {
    let config = small_config();
    let first = get_race_predictions_with(&config).expect("first run");
    let second = get_race_predictions_with(&config).expect("second run");
    assert_eq!(first.rankings, second.rankings);
    assert_eq!(first.accuracy_percent, second.accuracy_percent);
    assert_eq!(first.archive_fingerprint, second.archive_fingerprint);
}

#[test]
fn shuffled_folds_are_reproducible_for_a_seed() {
    let mut config = small_config();
    config.trainer.shuffle_seed = Some(7);
    let raw = load_directory(&fixture_dir()).expect("fixture tables should load");
    let first = run_pipeline(&raw, &config).expect("first run");
    let second = run_pipeline(&raw, &config).expect("second run");
    assert_eq!(first.accuracy_percent, second.accuracy_percent);
    assert_eq!(first.rankings, second.rankings);
}

#[test]
fn zipped_archive_matches_directory_tables() {
    let bytes = fixture_zip("f1db_csv/", None);
    let from_zip = load_zip(&bytes).expect("zip should load");
    let from_dir = load_directory(&fixture_dir()).expect("dir should load");

    assert_eq!(from_zip.drivers, from_dir.drivers);
    assert_eq!(from_zip.races, from_dir.races);
    assert_eq!(from_zip.results, from_dir.results);
    assert_eq!(from_zip.qualifying, from_dir.qualifying);
    assert_ne!(from_zip.fingerprint, from_dir.fingerprint);
    assert_eq!(from_zip.fingerprint.len(), 64);

    let flat = load_zip(&fixture_zip("", None)).expect("flat zip should load");
    assert_eq!(flat.results.len(), 18);
}

#[test]
fn archive_missing_a_table_is_an_acquisition_failure() {
    let bytes = fixture_zip("", Some("qualifying.csv"));
    let err = load_zip(&bytes).unwrap_err();
    assert_eq!(err.kind(), "data_acquisition");
    assert!(err.to_string().contains("qualifying.csv"));

    let err = load_zip(b"not a zip").unwrap_err();
    assert!(matches!(err, PipelineError::DataAcquisition(_)));
}

#[test]
fn missing_directory_is_an_acquisition_failure() {
    let mut config = small_config();
    config.source = ArchiveSource::Directory(fixture_dir().join("does-not-exist"));
    let err = get_race_predictions_with(&config).unwrap_err();
    assert_eq!(err.kind(), "data_acquisition");
}
