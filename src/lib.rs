//! # Review Ingest
//!
//! Manifest-driven incremental ingestion of newline-delimited JSON review
//! drops into year-partitioned Parquet.
//!
//! Files dropped into an inbox directory are streamed in bounded batches,
//! split by the year of their timestamp field, and written as immutable part
//! files. Each completed file is recorded in a JSON manifest and moved to a
//! processed directory, so re-running never reprocesses or duplicates data.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────────────┐
//! │  Inbox   │──▶│  Ingestor  │──▶│ BatchWriter │──▶│ <entity>/<col>=<yr>/ │
//! │ reviews_*│   │ (batches)  │   │  (Parquet)  │   │   part_*.parquet     │
//! └──────────┘   └─────┬──────┘   └─────────────┘   └──────────────────────┘
//!                      │ file done
//!                      ▼
//!               ┌────────────┐   ┌───────────┐
//!               │  Manifest  │──▶│  Archive  │
//!               │  (record)  │   │ processed/│
//!               └────────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rvi init                  # create inbox, archive, staging and manifest dirs
//! rvi ingest                # ingest new files
//! rvi ingest --dry-run      # show what would be ingested
//! rvi status                # manifest contents and pending files
//! rvi pipeline              # ingest, then run the configured transform steps
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, field values, manifest entries |
//! | [`writer`] | Year-partitioned Parquet batch writer |
//! | [`ingest`] | Streaming JSON-lines file ingestor |
//! | [`manifest`] | Processed-files manifest store |
//! | [`inbox`] | Inbox discovery and archive moves |
//! | [`driver`] | Incremental ingestion driver |
//! | [`pipeline`] | External transformation steps |
//! | [`progress`] | Progress reporting |
//! | [`status`] | Read-only state report |

pub mod config;
pub mod driver;
pub mod inbox;
pub mod ingest;
pub mod manifest;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod status;
pub mod writer;
