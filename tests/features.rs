use std::collections::HashMap;
use std::path::PathBuf;

use f1_forecast::archive::{RawTables, load_directory};
use f1_forecast::features::{build_feature_table, build_result_rows, order_races};

fn fixture_dir() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push("f1db");
    path
}

fn fixture_tables() -> RawTables {
    load_directory(&fixture_dir()).expect("fixture tables should load")
}

#[test]
fn fixture_builds_expected_rows_in_race_order() {
    let table = build_feature_table(&fixture_tables(), 2014).expect("features should build");
    let keys: Vec<(u32, u32)> = table
        .rows()
        .iter()
        .map(|r| (r.race_id, r.driver_id))
        .collect();
    assert_eq!(
        keys,
        vec![
            (201, 1),
            (201, 2),
            (201, 3),
            (199, 2),
            (199, 1),
            (199, 3),
            (199, 5),
            (203, 1),
            (203, 2),
            (203, 3),
            (203, 4),
            (203, 5),
        ]
    );
    assert!(table.rows().iter().all(|r| r.year >= 2014));
    assert!(table.rows().iter().all(|r| r.starting_position != 0));
    assert!(table.rows().iter().all(|r| r.q1_ms > 0));
}

#[test]
fn race_without_qualifying_is_dropped_entirely() {
    let table = build_feature_table(&fixture_tables(), 2014).expect("features should build");
    assert!(table.rows().iter().all(|r| r.race_id != 202));

    let mut raw = fixture_tables();
    raw.qualifying.retain(|q| q.race_id != 203);
    let table = build_feature_table(&raw, 2014).expect("features should build");
    assert!(table.rows().iter().all(|r| r.race_id != 203));
    assert_eq!(table.len(), 7);
}

#[test]
fn experience_counts_start_at_one_and_never_decrease() {
    let raw = fixture_tables();
    let races = order_races(&raw.races).expect("races should order");
    let rows = build_result_rows(&raw.results, &races).expect("results should join");

    let mut last: HashMap<u32, u32> = HashMap::new();
    for row in &rows {
        match last.get(&row.driver_id) {
            None => assert_eq!(row.experience_races, 1, "driver {}", row.driver_id),
            Some(prev) => assert!(row.experience_races > *prev, "driver {}", row.driver_id),
        }
        last.insert(row.driver_id, row.experience_races);
    }
    assert_eq!(last.get(&1), Some(&5));
    assert_eq!(last.get(&4), Some(&2));
}

#[test]
fn experience_survives_filters_and_years_count_from_debut() {
    let table = build_feature_table(&fixture_tables(), 2014).expect("features should build");
    let find = |race: u32, driver: u32| {
        table
            .rows()
            .iter()
            .find(|r| r.race_id == race && r.driver_id == driver)
            .expect("row should exist")
    };

    // Driver 1 raced in 2013 and in the uncovered race 202; both still count.
    assert_eq!(find(201, 1).experience_races, 2);
    assert_eq!(find(203, 1).experience_races, 5);
    assert_eq!(find(203, 1).experience_years, 1);
    // Driver 4's grid-0 start in race 201 still counts as experience.
    assert_eq!(find(203, 4).experience_races, 2);
    assert_eq!(find(203, 4).experience_years, 0);
}

#[test]
fn pace_features_follow_session_rules() {
    let table = build_feature_table(&fixture_tables(), 2014).expect("features should build");
    for row in table.rows() {
        assert!(
            f64::from(row.max_pace_ms) >= row.mean_pace_ms,
            "race {} driver {}",
            row.race_id,
            row.driver_id
        );
        let set = [row.q1_ms, row.q2_ms, row.q3_ms]
            .iter()
            .filter(|t| **t != 0)
            .count();
        if set == 1 {
            assert_eq!(f64::from(row.max_pace_ms), row.mean_pace_ms);
        }
    }

    let full = table
        .rows()
        .iter()
        .find(|r| r.race_id == 201 && r.driver_id == 1)
        .expect("row should exist");
    assert_eq!((full.q1_ms, full.q2_ms, full.q3_ms), (91_699, 102_890, 104_231));
    assert_eq!(full.max_pace_ms, 104_231);
    assert!((full.mean_pace_ms - 298_820.0 / 3.0).abs() < 1e-6);

    let q1_only = table
        .rows()
        .iter()
        .find(|r| r.race_id == 199 && r.driver_id == 5)
        .expect("row should exist");
    assert_eq!((q1_only.q2_ms, q1_only.q3_ms), (0, 0));
    assert_eq!(q1_only.max_pace_ms, 104_000);
    assert_eq!(q1_only.nationality.as_deref(), Some("German"));
}

#[test]
fn empty_stages_fail_with_integrity_errors() {
    let mut raw = fixture_tables();
    raw.qualifying.clear();
    let err = build_feature_table(&raw, 2014).unwrap_err();
    assert_eq!(err.kind(), "data_integrity");
    assert!(err.to_string().contains("qualifying era filter"));

    let mut raw = fixture_tables();
    for result in &mut raw.results {
        result.grid = 0;
    }
    let err = build_feature_table(&raw, 2014).unwrap_err();
    assert!(err.to_string().contains("grid filter"));

    let err = build_feature_table(&fixture_tables(), 2030).unwrap_err();
    assert_eq!(err.kind(), "data_integrity");
}

#[test]
fn malformed_lap_time_is_reported_with_its_row() {
    let mut raw = fixture_tables();
    let entry = raw
        .qualifying
        .iter_mut()
        .find(|q| q.race_id == 203 && q.driver_id == 2)
        .expect("qualifying row");
    entry.q2 = Some("1.32,700".to_string());

    let err = build_feature_table(&raw, 2014).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("lap time parsing"));
    assert!(msg.contains("race 203 driver 2"));
}
