//! Incremental ingestion driver.
//!
//! Per candidate file, strictly in order and one file at a time:
//!
//! 1. **discover** matching inbox files, sorted by name
//! 2. **skip** files already in the manifest
//! 3. **ingest** the file into partitioned storage (any error aborts the run)
//! 4. **record** a manifest entry and persist the manifest
//! 5. **archive** the file into the processed directory
//!
//! Recording happens before archiving. A crash between the two leaves a
//! file that is recorded but still in the inbox; the next run sees it in the
//! manifest, does not re-ingest it, and finishes the archive move.

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::Config;
use crate::inbox::{self, SourceFile};
use crate::ingest::ingest_file;
use crate::manifest::ManifestStore;
use crate::models::ManifestEntry;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::writer::{BatchSink, ParquetBatchWriter};

/// Per-run knobs coming from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Maximum number of files to ingest in this run.
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub ingested: Vec<String>,
    pub skipped: Vec<String>,
    /// Recorded files found still in the inbox and archived this run.
    pub archived_leftovers: Vec<String>,
    /// Pending files left for a later run because of `--limit`.
    pub deferred: Vec<String>,
    pub records: u64,
    pub batches: u64,
}

/// Create every directory the pipeline writes to.
pub fn ensure_dirs(config: &Config) -> Result<()> {
    let entity_root = config.entity_root();
    let manifest_dir = config
        .paths
        .manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty());
    for dir in [
        Some(config.paths.inbox.as_path()),
        Some(config.paths.processed.as_path()),
        Some(entity_root.as_path()),
        manifest_dir,
    ]
    .into_iter()
    .flatten()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Run incremental ingestion with the Parquet writer.
pub fn run_ingest(
    config: &Config,
    options: &RunOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<RunSummary> {
    let mut writer = ParquetBatchWriter::new(config)?;
    run_with_sink(config, options, &mut writer, progress)
}

/// Run incremental ingestion against any batch sink.
pub fn run_with_sink(
    config: &Config,
    options: &RunOptions,
    sink: &mut dyn BatchSink,
    progress: &dyn IngestProgressReporter,
) -> Result<RunSummary> {
    let batch_size = options.batch_size.unwrap_or(config.ingest.batch_size);
    if batch_size == 0 {
        anyhow::bail!("batch size must be > 0");
    }

    if !options.dry_run {
        ensure_dirs(config)?;
    }

    let mut store = ManifestStore::load(&config.paths.manifest)?;
    tracing::debug!(
        manifest = %store.path().display(),
        entries = store.entries().len(),
        "manifest loaded"
    );
    let files = inbox::discover(&config.paths.inbox, &config.ingest.pattern)?;

    let mut summary = RunSummary {
        discovered: files.len(),
        ..Default::default()
    };

    if files.is_empty() {
        tracing::info!(inbox = %config.paths.inbox.display(), "no incoming files found");
        return Ok(summary);
    }

    for file in files {
        if let Some(entry) = store.get(&file.name) {
            skip_recorded(config, options, entry, &file, &mut summary)?;
            progress.report(IngestProgressEvent::FileSkipped {
                file: file.name.clone(),
            });
            continue;
        }

        if options.limit.is_some_and(|limit| summary.ingested.len() >= limit) {
            summary.deferred.push(file.name);
            continue;
        }

        if options.dry_run {
            tracing::info!(file = %file.name, "would ingest");
            summary.ingested.push(file.name);
            continue;
        }

        let outcome = ingest_file(&file.path, batch_size, sink, progress)
            .with_context(|| format!("Ingestion failed for {}", file.name))?;

        store.append(ManifestEntry {
            filename: file.name.clone(),
            processed_at_utc: Utc::now(),
            record_count: outcome.record_count,
            content_sha256: Some(outcome.content_sha256),
        })?;

        inbox::archive(&file, &config.paths.processed)?;

        progress.report(IngestProgressEvent::FileDone {
            file: file.name.clone(),
            total: outcome.record_count,
        });
        summary.records += outcome.record_count;
        summary.batches += outcome.batches;
        summary.ingested.push(file.name);
    }

    tracing::info!(
        ingested = summary.ingested.len(),
        skipped = summary.skipped.len(),
        records = summary.records,
        "incremental ingestion complete"
    );
    Ok(summary)
}

fn skip_recorded(
    config: &Config,
    options: &RunOptions,
    entry: &ManifestEntry,
    file: &SourceFile,
    summary: &mut RunSummary,
) -> Result<()> {
    summary.skipped.push(file.name.clone());

    // Same bytes as recorded: a previous run stopped between recording and
    // archiving. Anything else is a reused filename and stays where it is.
    let Some(recorded) = entry.content_sha256.as_deref() else {
        tracing::info!(file = %file.name, "skipping already processed file");
        return Ok(());
    };
    if inbox::file_sha256(&file.path)? != recorded {
        tracing::warn!(
            file = %file.name,
            "skipping already processed filename with different content"
        );
        return Ok(());
    }

    if options.dry_run {
        tracing::info!(file = %file.name, "already processed, would archive leftover");
    } else {
        inbox::archive(file, &config.paths.processed)?;
        tracing::warn!(file = %file.name, "already processed, archived leftover from interrupted run");
    }
    summary.archived_leftovers.push(file.name.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::progress::NoProgress;
    use crate::writer::BatchReport;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSink {
        writes: Vec<usize>,
    }

    impl BatchSink for CountingSink {
        fn write_batch(&mut self, batch: &[Record]) -> Result<BatchReport> {
            self.writes.push(batch.len());
            Ok(BatchReport {
                records: batch.len() as u64,
                ..Default::default()
            })
        }
    }

    fn setup(files: &[(&str, &str)]) -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        std::fs::create_dir_all(&config.paths.inbox).unwrap();
        for (name, body) in files {
            std::fs::write(config.paths.inbox.join(name), body).unwrap();
        }
        (tmp, config)
    }

    #[test]
    fn limit_defers_remaining_files() {
        let (_tmp, config) = setup(&[
            ("reviews_1.json", "{\"date\":\"2020-01-01\"}\n"),
            ("reviews_2.json", "{\"date\":\"2020-01-01\"}\n"),
            ("reviews_3.json", "{\"date\":\"2020-01-01\"}\n"),
        ]);
        let options = RunOptions {
            limit: Some(2),
            ..Default::default()
        };
        let summary =
            run_with_sink(&config, &options, &mut CountingSink::default(), &NoProgress).unwrap();
        assert_eq!(summary.ingested, ["reviews_1.json", "reviews_2.json"]);
        assert_eq!(summary.deferred, ["reviews_3.json"]);
        assert!(config.paths.inbox.join("reviews_3.json").exists());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let (_tmp, config) = setup(&[("reviews_1.json", "{\"date\":\"2020-01-01\"}\n")]);
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let mut sink = CountingSink::default();
        let summary = run_with_sink(&config, &options, &mut sink, &NoProgress).unwrap();
        assert_eq!(summary.ingested, ["reviews_1.json"]);
        assert!(sink.writes.is_empty());
        assert!(config.paths.inbox.join("reviews_1.json").exists());
        assert!(!config.paths.manifest.exists());
    }

    #[test]
    fn batch_size_override() {
        let (_tmp, config) = setup(&[(
            "reviews_1.json",
            "{\"date\":\"2020-01-01\"}\n{\"date\":\"2020-01-02\"}\n{\"date\":\"2020-01-03\"}\n",
        )]);
        let options = RunOptions {
            batch_size: Some(2),
            ..Default::default()
        };
        let mut sink = CountingSink::default();
        let summary = run_with_sink(&config, &options, &mut sink, &NoProgress).unwrap();
        assert_eq!(sink.writes, [2, 1]);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.batches, 2);

        let store = ManifestStore::load(&config.paths.manifest).unwrap();
        assert_eq!(store.entries()[0].record_count, 3);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let (_tmp, config) = setup(&[]);
        let options = RunOptions {
            batch_size: Some(0),
            ..Default::default()
        };
        assert!(
            run_with_sink(&config, &options, &mut CountingSink::default(), &NoProgress).is_err()
        );
    }

    #[test]
    fn recorded_leftover_is_archived_not_reingested() {
        let (_tmp, config) = setup(&[("reviews_1.json", "{\"date\":\"2020-01-01\"}\n")]);
        let path = config.paths.inbox.join("reviews_1.json");
        let mut store = ManifestStore::load(&config.paths.manifest).unwrap();
        store
            .append(ManifestEntry {
                filename: "reviews_1.json".to_string(),
                processed_at_utc: Utc::now(),
                record_count: 1,
                content_sha256: Some(inbox::file_sha256(&path).unwrap()),
            })
            .unwrap();

        let mut sink = CountingSink::default();
        let summary =
            run_with_sink(&config, &RunOptions::default(), &mut sink, &NoProgress).unwrap();

        assert!(sink.writes.is_empty());
        assert_eq!(summary.archived_leftovers, ["reviews_1.json"]);
        assert!(!config.paths.inbox.join("reviews_1.json").exists());
        assert!(config.paths.processed.join("reviews_1.json").exists());
        assert_eq!(
            ManifestStore::load(&config.paths.manifest).unwrap().entries().len(),
            1
        );
    }

    #[test]
    fn reused_filename_is_left_in_inbox() {
        let (_tmp, config) = setup(&[("reviews_1.json", "{\"date\":\"2021-01-01\"}\n")]);
        let mut store = ManifestStore::load(&config.paths.manifest).unwrap();
        store
            .append(ManifestEntry {
                filename: "reviews_1.json".to_string(),
                processed_at_utc: Utc::now(),
                record_count: 5,
                content_sha256: Some("00".repeat(32)),
            })
            .unwrap();

        let mut sink = CountingSink::default();
        let summary =
            run_with_sink(&config, &RunOptions::default(), &mut sink, &NoProgress).unwrap();

        assert!(sink.writes.is_empty());
        assert_eq!(summary.skipped, ["reviews_1.json"]);
        assert!(summary.archived_leftovers.is_empty());
        assert!(config.paths.inbox.join("reviews_1.json").exists());
    }
}
