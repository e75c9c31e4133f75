//! End-to-end behaviour of the incremental driver against real Parquet output.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use arrow::array::{Array, Int32Array, StringArray};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use review_ingest::config::Config;
use review_ingest::driver::{run_ingest, RunOptions};
use review_ingest::manifest::ManifestStore;
use review_ingest::progress::NoProgress;
use review_ingest::writer::NULL_PARTITION;
use tempfile::TempDir;
use walkdir::WalkDir;

const REVIEWS_001: &str = concat!(
    r#"{"review_id":"r1","user_id":"u1","business_id":"b1","stars":5,"text":"great","date":"2020-02-01 10:00:00"}"#,
    "\n",
    r#"{"review_id":"r1","user_id":"u1","business_id":"b1","stars":4,"text":"edit","date":"2020-02-05 10:00:00"}"#,
    "\n",
    r#"{"review_id":"r2","user_id":"u2","business_id":"b2","stars":3,"text":"ok","date":"2020-03-01 12:00:00"}"#,
    "\n",
);

fn setup(files: &[(&str, &str)]) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let config = Config::rooted_at(tmp.path());
    fs::create_dir_all(&config.paths.inbox).unwrap();
    for (name, body) in files {
        fs::write(config.paths.inbox.join(name), body).unwrap();
    }
    (tmp, config)
}

fn part_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// review_id values per partition directory name.
fn rows_by_partition(root: &Path) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in part_files(root) {
        let partition = path
            .parent()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        let reader = ParquetRecordBatchReaderBuilder::try_new(fs::File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        for batch in reader {
            let batch = batch.unwrap();
            let ids = batch
                .column_by_name("review_id")
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            let entry = out.entry(partition.clone()).or_default();
            for i in 0..ids.len() {
                entry.push(ids.value(i).to_string());
            }
        }
    }
    for ids in out.values_mut() {
        ids.sort();
    }
    out
}

fn inbox_names(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(&config.paths.inbox)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn single_file_scenario() {
    let (_tmp, config) = setup(&[("reviews_001.jsonl", REVIEWS_001)]);

    let summary = run_ingest(&config, &RunOptions::default(), &NoProgress).unwrap();
    assert_eq!(summary.ingested, ["reviews_001.jsonl"]);
    assert_eq!(summary.records, 3);

    let store = ManifestStore::load(&config.paths.manifest).unwrap();
    assert_eq!(store.entries().len(), 1);
    assert_eq!(store.entries()[0].filename, "reviews_001.jsonl");
    assert_eq!(store.entries()[0].record_count, 3);

    // Duplicates are kept; dedup happens downstream.
    let rows = rows_by_partition(&config.entity_root());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows["review_year=2020"], ["r1", "r1", "r2"]);

    assert!(inbox_names(&config).is_empty());
    assert_eq!(
        fs::read_to_string(config.paths.processed.join("reviews_001.jsonl")).unwrap(),
        REVIEWS_001
    );
}

#[test]
fn second_run_changes_nothing() {
    let (_tmp, config) = setup(&[
        ("reviews_001.jsonl", REVIEWS_001),
        ("reviews_002.jsonl", "{\"review_id\":\"r9\",\"date\":\"2019-07-04\"}\n"),
    ]);

    run_ingest(&config, &RunOptions::default(), &NoProgress).unwrap();
    let manifest_before = fs::read_to_string(&config.paths.manifest).unwrap();
    let files_before = part_files(&config.paths.staged_root);

    let summary = run_ingest(&config, &RunOptions::default(), &NoProgress).unwrap();
    assert!(summary.ingested.is_empty());
    assert_eq!(summary.discovered, 0);

    assert_eq!(fs::read_to_string(&config.paths.manifest).unwrap(), manifest_before);
    assert_eq!(part_files(&config.paths.staged_root), files_before);
}

#[test]
fn recorded_name_is_never_reingested() {
    let (_tmp, config) = setup(&[("reviews_001.jsonl", REVIEWS_001)]);
    run_ingest(&config, &RunOptions::default(), &NoProgress).unwrap();

    // Same name dropped again with different content.
    fs::write(
        config.paths.inbox.join("reviews_001.jsonl"),
        "{\"review_id\":\"r7\",\"date\":\"2022-01-01\"}\n",
    )
    .unwrap();
    let summary = run_ingest(&config, &RunOptions::default(), &NoProgress).unwrap();

    assert_eq!(summary.skipped, ["reviews_001.jsonl"]);
    assert!(summary.ingested.is_empty());
    let rows = rows_by_partition(&config.entity_root());
    assert!(!rows.contains_key("review_year=2022"));
    assert_eq!(ManifestStore::load(&config.paths.manifest).unwrap().entries().len(), 1);
    // The archived original is not overwritten.
    assert_eq!(
        fs::read_to_string(config.paths.processed.join("reviews_001.jsonl")).unwrap(),
        REVIEWS_001
    );
}

#[test]
fn unparseable_and_missing_dates_go_to_null_partition() {
    let body = concat!(
        r#"{"review_id":"a","date":"2018-01-01 00:00:00"}"#,
        "\n",
        r#"{"review_id":"b","date":"someday"}"#,
        "\n",
        r#"{"review_id":"c"}"#,
        "\n",
        r#"{"review_id":"d","date":null}"#,
        "\n",
    );
    let (_tmp, config) = setup(&[("reviews_x.json", body)]);

    let summary = run_ingest(&config, &RunOptions::default(), &NoProgress).unwrap();
    assert_eq!(summary.records, 4);

    let rows = rows_by_partition(&config.entity_root());
    assert_eq!(rows["review_year=2018"], ["a"]);
    assert_eq!(
        rows[&format!("review_year={}", NULL_PARTITION)],
        ["b", "c", "d"]
    );

    let store = ManifestStore::load(&config.paths.manifest).unwrap();
    assert_eq!(store.entries()[0].record_count, 4);
}

#[test]
fn batch_size_does_not_change_results() {
    let body: String = (0..23)
        .map(|i| {
            format!(
                "{{\"review_id\":\"r{:02}\",\"date\":\"{}-06-01\"}}\n",
                i,
                2015 + i % 3
            )
        })
        .collect();

    let mut baseline = None;
    for batch_size in [1, 4, 23, 1000] {
        let (_tmp, config) = setup(&[("reviews_a.json", body.as_str())]);
        let options = RunOptions {
            batch_size: Some(batch_size),
            ..Default::default()
        };
        let summary = run_ingest(&config, &options, &NoProgress).unwrap();
        assert_eq!(summary.records, 23);
        assert_eq!(summary.batches, 23u64.div_ceil(batch_size as u64));

        let rows = rows_by_partition(&config.entity_root());
        match &baseline {
            Some(expected) => assert_eq!(&rows, expected),
            None => baseline = Some(rows),
        }
    }
}

#[test]
fn failure_aborts_run_without_recording() {
    let (_tmp, config) = setup(&[
        ("reviews_1.json", "{\"review_id\":\"ok\",\"date\":\"2020-01-01\"}\n"),
        (
            "reviews_2.json",
            "{\"review_id\":\"x\",\"date\":\"2020-01-01\"}\n{\"review_id\": oops}\n",
        ),
        ("reviews_3.json", "{\"review_id\":\"later\",\"date\":\"2020-01-01\"}\n"),
    ]);
    let options = RunOptions {
        batch_size: Some(1),
        ..Default::default()
    };

    let err = run_ingest(&config, &options, &NoProgress).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("reviews_2.json"), "{}", msg);
    assert!(msg.contains("line 2"), "{}", msg);

    let store = ManifestStore::load(&config.paths.manifest).unwrap();
    assert!(store.contains("reviews_1.json"));
    assert!(!store.contains("reviews_2.json"));
    assert!(!store.contains("reviews_3.json"));
    assert_eq!(inbox_names(&config), ["reviews_2.json", "reviews_3.json"]);

    // Fix the file and re-run: the failed file is retried, earlier ones are not.
    fs::write(
        config.paths.inbox.join("reviews_2.json"),
        "{\"review_id\":\"x\",\"date\":\"2020-01-01\"}\n",
    )
    .unwrap();
    let summary = run_ingest(&config, &options, &NoProgress).unwrap();
    assert_eq!(summary.ingested, ["reviews_2.json", "reviews_3.json"]);
    assert_eq!(
        ManifestStore::load(&config.paths.manifest).unwrap().entries().len(),
        3
    );
}

#[test]
fn derived_year_column_matches_directory() {
    let (_tmp, config) = setup(&[(
        "reviews_y.json",
        "{\"review_id\":\"a\",\"date\":\"2016-12-31 23:59:59\"}\n{\"review_id\":\"b\",\"date\":\"2017-01-01 00:00:00\"}\n",
    )]);
    run_ingest(&config, &RunOptions::default(), &NoProgress).unwrap();

    for path in part_files(&config.entity_root()) {
        let dir = path.parent().unwrap().file_name().unwrap().to_string_lossy().to_string();
        let expected: i32 = dir.trim_start_matches("review_year=").parse().unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(fs::File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        for batch in reader {
            let batch = batch.unwrap();
            let years = batch
                .column_by_name("review_year")
                .unwrap()
                .as_any()
                .downcast_ref::<Int32Array>()
                .unwrap();
            assert!(years.iter().all(|y| y == Some(expected)));
        }
    }
}
