//! Ingest progress reporting.
//!
//! Reports observable progress during `rvi ingest` so operators can see which
//! file is being read and how many records have been flushed. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an ingest run.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// A source file is about to be streamed.
    FileStarted { file: String },
    /// A batch was flushed; `total` is the running record count for the file.
    BatchFlushed { file: String, batch: u64, total: u64 },
    /// The file was fully ingested and recorded.
    FileDone { file: String, total: u64 },
    /// The file is already in the manifest.
    FileSkipped { file: String },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest reviews_001.jsonl  batch 3  750,000 records".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::FileStarted { file } => format!("ingest {}  reading...\n", file),
            IngestProgressEvent::BatchFlushed { file, batch, total } => format!(
                "ingest {}  batch {}  {} records\n",
                file,
                batch,
                format_number(*total)
            ),
            IngestProgressEvent::FileDone { file, total } => {
                format!("ingest {}  done  {} records\n", file, format_number(*total))
            }
            IngestProgressEvent::FileSkipped { file } => {
                format!("ingest {}  skipped (already processed)\n", file)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::FileStarted { file } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "reading"
            }),
            IngestProgressEvent::BatchFlushed { file, batch, total } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "batch",
                "batch": batch,
                "total": total
            }),
            IngestProgressEvent::FileDone { file, total } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "done",
                "total": total
            }),
            IngestProgressEvent::FileSkipped { file } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "skipped"
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(250_000), "250,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
