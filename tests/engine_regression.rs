//! Engine Regression Tests
//!
//! Exercises the full pipeline on a synthetic dataset: snapshot files on
//! disk -> chunked ingestion -> normalization -> SOM training -> evaluation
//! -> artifact save/load -> inference with analog matching. Asserts the
//! save/load boundary changes nothing about classification.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use synoptic::archive::ModelArchive;
use synoptic::config::{InferenceConfig, TrainingConfig};
use synoptic::ingest::{DirectorySource, FeatureAssembler, Grid2d, Snapshot};
use synoptic::pipeline::{run_inference, run_training};
use synoptic::types::{Dataset, GridShape, LatOrder};

fn day(i: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::days(i as i64)
}

/// 10 timestamps x 2 variables x 3x3 grid, two alternating regimes with
/// per-day jitter so no cell is constant.
fn make_dataset() -> Dataset {
    let shape = GridShape::new(vec!["h500".to_string(), "h200".to_string()], 3, 3);
    let mut vectors = Vec::new();
    for i in 0..10 {
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        let jitter = (i % 4) as f64 * 0.02;
        let mut v = Vec::with_capacity(18);
        for cell in 0..9 {
            v.push(sign * (50.0 + cell as f64) + jitter);
        }
        for cell in 0..9 {
            v.push(sign * (10.0 + cell as f64) - jitter);
        }
        vectors.push(v);
    }
    let timestamps = (0..10).map(day).collect();
    Dataset::new(shape, timestamps, vectors).unwrap()
}

fn make_training_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.n_nodex = 2;
    config.n_nodey = 2;
    config.iterations = 100;
    config.seed = 7;
    config
}

#[test]
fn end_to_end_train_save_load_classify() {
    let dataset = make_dataset();
    let output = run_training(&dataset, &make_training_config()).unwrap();

    // Every sample lands on one of the four nodes.
    assert_eq!(output.assignments.len(), 10);
    for a in &output.assignments {
        assert!(a.node.x < 2, "node x out of range: {}", a.node);
        assert!(a.node.y < 2, "node y out of range: {}", a.node);
        assert!(a.type_id < 4);
    }

    // Quantization error is finite and non-negative.
    assert!(output.report.quantization_error.is_finite());
    assert!(output.report.quantization_error >= 0.0);

    // Save, load, and re-run winners: assignments must be identical.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db").join("som_model.json");
    ModelArchive::save(&output.artifact, &path).unwrap();
    let loaded = ModelArchive::load(&path).unwrap();

    let records = run_inference(&dataset, &loaded, &InferenceConfig::default()).unwrap();
    assert_eq!(records.len(), 10);
    for (record, assignment) in records.iter().zip(&output.assignments) {
        assert_eq!(
            record.type_id, assignment.type_id,
            "post-load classification diverged at {}",
            assignment.timestamp
        );
        assert_eq!(record.type_coordinate, assignment.node.coordinate_string());
    }
}

#[test]
fn analog_matching_finds_training_days_exactly() {
    let dataset = make_dataset();
    let output = run_training(&dataset, &make_training_config()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("som_model.json");
    ModelArchive::save(&output.artifact, &path).unwrap();
    let loaded = ModelArchive::load(&path).unwrap();

    let mut inference = InferenceConfig::default();
    inference.match_history = true;
    let records = run_inference(&dataset, &loaded, &inference).unwrap();

    // Inference data is bit-identical to training data, so each day's
    // analog is that day itself at distance zero.
    for (record, expected) in records.iter().zip(dataset.timestamps()) {
        assert_eq!(record.best_match, Some(*expected));
    }
}

#[test]
fn training_is_reproducible_across_runs() {
    let dataset = make_dataset();
    let config = make_training_config();

    let first = run_training(&dataset, &config).unwrap();
    let second = run_training(&dataset, &config).unwrap();

    for (a, b) in first
        .artifact
        .prototypes
        .iter()
        .zip(&second.artifact.prototypes)
    {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-12, "prototype grids diverged");
        }
    }
    assert_eq!(
        first
            .assignments
            .iter()
            .map(|a| a.type_id)
            .collect::<Vec<_>>(),
        second
            .assignments
            .iter()
            .map(|a| a.type_id)
            .collect::<Vec<_>>()
    );
}

#[test]
fn ingestion_from_snapshot_directory() {
    let dir = tempfile::tempdir().unwrap();

    // Write 6 snapshot files; the second variable arrives south-to-north
    // and must be flipped during assembly.
    for i in 0..6 {
        let timestamp = day(i);
        let mut variables = HashMap::new();
        variables.insert(
            "h500".to_string(),
            Grid2d {
                nrow: 2,
                ncol: 2,
                lat_order: LatOrder::NorthToSouth,
                values: vec![1.0 + i as f64, 2.0, 3.0, 4.0],
            },
        );
        variables.insert(
            "h200".to_string(),
            Grid2d {
                nrow: 2,
                ncol: 2,
                lat_order: LatOrder::SouthToNorth,
                values: vec![30.0, 40.0, 10.0 + i as f64, 20.0],
            },
        );
        let snapshot = Snapshot {
            timestamp,
            variables,
        };
        let path = dir.path().join(DirectorySource::file_name(timestamp));
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();
    }

    let source = DirectorySource::new(dir.path());
    let times = source.list_timestamps().unwrap();
    assert_eq!(times.len(), 6);

    let assembler =
        FeatureAssembler::new(vec!["h500".to_string(), "h200".to_string()], 3).unwrap();
    let dataset = assembler.assemble(&source, &times).unwrap();

    assert_eq!(dataset.len(), 6);
    assert_eq!(dataset.shape().feature_len(), 8);
    // h500 first, then h200 flipped to north-to-south.
    assert_eq!(&dataset.vectors()[0][..4], &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(&dataset.vectors()[0][4..], &[10.0, 20.0, 30.0, 40.0]);
}

#[test]
fn majority_vote_aggregates_subdaily_samples() {
    // Four 6-hourly samples per day over 2 days on a tiny grid.
    let shape = GridShape::new(vec!["slp".to_string()], 1, 2);
    let mut timestamps = Vec::new();
    let mut vectors = Vec::new();
    for d in 0..2 {
        for h in [0u32, 6, 12, 18] {
            timestamps
                .push(Utc.with_ymd_and_hms(2016, 2, 1 + d, h, 0, 0).unwrap());
            // Day 0: three "high" samples, one "low". Day 1: inverse.
            let high = if d == 0 { h != 12 } else { h == 12 };
            vectors.push(if high {
                vec![8.0 + h as f64 * 0.01, 8.0]
            } else {
                vec![-8.0 - h as f64 * 0.01, -8.0]
            });
        }
    }
    let dataset = Dataset::new(shape, timestamps, vectors).unwrap();

    let mut config = make_training_config();
    config.n_nodex = 1;
    config.iterations = 200;
    let output = run_training(&dataset, &config).unwrap();

    let records = run_inference(&dataset, &output.artifact, &InferenceConfig::default()).unwrap();
    assert_eq!(records.len(), 2, "expected one aggregated record per day");

    // The two days voted for different types.
    assert_ne!(records[0].type_id, records[1].type_id);
}
