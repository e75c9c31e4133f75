//! File ingestion: stream one JSON-lines file into bounded batches.
//!
//! Memory is bounded by `batch_size`, not by file size. A malformed line
//! fails the whole file; batches already flushed for that file stay on disk
//! as unreferenced part files, and the caller must not record the file.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::models::Record;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::writer::BatchSink;

/// Result of a fully ingested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub record_count: u64,
    pub batches: u64,
    pub content_sha256: String,
}

pub fn ingest_file(
    path: &Path,
    batch_size: usize,
    sink: &mut dyn BatchSink,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestOutcome> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let file =
        File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    progress.report(IngestProgressEvent::FileStarted { file: name.clone() });

    let mut hasher = Sha256::new();
    let mut batch: Vec<Record> = Vec::with_capacity(batch_size.min(64 * 1024));
    let mut total = 0u64;
    let mut batches = 0u64;
    let mut line = String::new();
    let mut line_no = 0u64;

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .with_context(|| format!("{}: read error after line {}", name, line_no))?;
        if read == 0 {
            break;
        }
        line_no += 1;
        hasher.update(line.as_bytes());

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record = Record::parse(trimmed)
            .with_context(|| format!("{}: malformed JSON on line {}", name, line_no))?;
        batch.push(record);

        if batch.len() >= batch_size {
            total += flush(&name, &mut batch, sink)?;
            batches += 1;
            progress.report(IngestProgressEvent::BatchFlushed {
                file: name.clone(),
                batch: batches,
                total,
            });
        }
    }

    if !batch.is_empty() {
        total += flush(&name, &mut batch, sink)?;
        batches += 1;
        progress.report(IngestProgressEvent::BatchFlushed {
            file: name.clone(),
            batch: batches,
            total,
        });
    }

    tracing::info!(file = %name, records = total, batches, "file ingested");

    Ok(IngestOutcome {
        record_count: total,
        batches,
        content_sha256: hex::encode(hasher.finalize()),
    })
}

fn flush(name: &str, batch: &mut Vec<Record>, sink: &mut dyn BatchSink) -> Result<u64> {
    let count = batch.len() as u64;
    sink.write_batch(batch)
        .with_context(|| format!("{}: failed to write batch of {} records", name, count))?;
    batch.clear();
    Ok(count)
}
