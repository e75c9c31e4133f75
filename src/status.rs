//! Read-only overview of ingestion state, used by `rvi status`.

use anyhow::Result;

use crate::config::Config;
use crate::inbox;
use crate::manifest::ManifestStore;
use crate::progress::format_number;

pub struct Status {
    pub processed: Vec<(String, String, u64)>,
    pub pending: Vec<String>,
    /// Inbox files whose name is already recorded.
    pub recorded_in_inbox: Vec<String>,
    pub total_records: u64,
}

pub fn collect_status(config: &Config) -> Result<Status> {
    let store = ManifestStore::load(&config.paths.manifest)?;
    let files = inbox::discover(&config.paths.inbox, &config.ingest.pattern)?;

    let processed = store
        .entries()
        .iter()
        .map(|e| {
            (
                e.filename.clone(),
                e.processed_at_utc.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.record_count,
            )
        })
        .collect();
    let total_records = store.entries().iter().map(|e| e.record_count).sum();

    let (recorded_in_inbox, pending): (Vec<String>, Vec<String>) = files
        .into_iter()
        .map(|f| f.name)
        .partition(|name| store.contains(name));

    Ok(Status {
        processed,
        pending,
        recorded_in_inbox,
        total_records,
    })
}

pub fn run_status(config: &Config) -> Result<()> {
    let status = collect_status(config)?;

    println!("{:<40} {:<20} RECORDS", "FILE", "PROCESSED (UTC)");
    for (name, at, count) in &status.processed {
        println!("{:<40} {:<20} {}", name, at, format_number(*count));
    }
    println!();
    println!("  processed files: {}", status.processed.len());
    println!("  total records: {}", format_number(status.total_records));
    println!("  pending files: {}", status.pending.len());
    for name in &status.pending {
        println!("    {}", name);
    }
    if !status.recorded_in_inbox.is_empty() {
        println!(
            "  already recorded, still in inbox: {}",
            status.recorded_in_inbox.len()
        );
        for name in &status.recorded_in_inbox {
            println!("    {}", name);
        }
    }

    Ok(())
}
