//! TOML configuration for the ingestion pipeline.
//!
//! Every section has defaults matching the standard data layout, so an empty
//! file (or [`Config::default`]) describes a working setup rooted at the
//! current directory.

use anyhow::{Context, Result};
use parquet::basic::Compression;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub transform: Option<TransformConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_inbox")]
    pub inbox: PathBuf,
    #[serde(default = "default_processed")]
    pub processed: PathBuf,
    #[serde(default = "default_staged_root")]
    pub staged_root: PathBuf,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            processed: default_processed(),
            staged_root: default_staged_root(),
            manifest: default_manifest(),
        }
    }
}

fn default_inbox() -> PathBuf {
    PathBuf::from("data/raw/incoming")
}
fn default_processed() -> PathBuf {
    PathBuf::from("data/raw/processed")
}
fn default_staged_root() -> PathBuf {
    PathBuf::from("data/staged")
}
fn default_manifest() -> PathBuf {
    PathBuf::from("manifests/processed_files.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_entity")]
    pub entity: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_partition_column")]
    pub partition_column: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_compression")]
    pub compression: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            batch_size: default_batch_size(),
            entity: default_entity(),
            timestamp_field: default_timestamp_field(),
            partition_column: default_partition_column(),
            timestamp_column: default_timestamp_column(),
            compression: default_compression(),
        }
    }
}

fn default_pattern() -> String {
    "reviews_*.json*".to_string()
}
fn default_batch_size() -> usize {
    250_000
}
fn default_entity() -> String {
    "reviews".to_string()
}
fn default_timestamp_field() -> String {
    "date".to_string()
}
fn default_partition_column() -> String {
    "review_year".to_string()
}
fn default_timestamp_column() -> String {
    "review_ts".to_string()
}
fn default_compression() -> String {
    "zstd".to_string()
}

impl IngestConfig {
    /// Parquet codec named by `compression`.
    pub fn parquet_compression(&self) -> Result<Compression> {
        match self.compression.as_str() {
            "zstd" => Ok(Compression::ZSTD(Default::default())),
            "snappy" => Ok(Compression::SNAPPY),
            "none" => Ok(Compression::UNCOMPRESSED),
            other => anyhow::bail!(
                "Unknown compression: '{}'. Must be zstd, snappy, or none.",
                other
            ),
        }
    }
}

/// External transformation step run by `rvi pipeline` after ingestion.
#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    pub run: Vec<String>,
    #[serde(default)]
    pub test: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Config {
    /// Default layout with every path placed under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let defaults = PathsConfig::default();
        Self {
            paths: PathsConfig {
                inbox: root.join(defaults.inbox),
                processed: root.join(defaults.processed),
                staged_root: root.join(defaults.staged_root),
                manifest: root.join(defaults.manifest),
            },
            ingest: IngestConfig::default(),
            transform: None,
        }
    }

    /// Directory holding the partitioned output for the configured entity.
    pub fn entity_root(&self) -> PathBuf {
        self.paths.staged_root.join(&self.ingest.entity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            anyhow::bail!("ingest.batch_size must be > 0");
        }

        if self.ingest.entity.is_empty() || self.ingest.entity.contains(['/', '\\']) {
            anyhow::bail!("ingest.entity must be a non-empty single path segment");
        }

        if self.ingest.timestamp_field.is_empty() {
            anyhow::bail!("ingest.timestamp_field must not be empty");
        }

        if self.ingest.partition_column.is_empty() || self.ingest.timestamp_column.is_empty() {
            anyhow::bail!("ingest.partition_column and ingest.timestamp_column must not be empty");
        }

        if self.ingest.partition_column == self.ingest.timestamp_column {
            anyhow::bail!("ingest.partition_column and ingest.timestamp_column must differ");
        }

        globset::Glob::new(&self.ingest.pattern)
            .with_context(|| format!("Invalid ingest.pattern: '{}'", self.ingest.pattern))?;

        self.ingest.parquet_compression()?;

        if self.paths.inbox == self.paths.processed {
            anyhow::bail!("paths.inbox and paths.processed must be different directories");
        }

        if let Some(transform) = &self.transform {
            if transform.run.is_empty() {
                anyhow::bail!("transform.run must name a command");
            }
            if transform.timeout_secs == 0 {
                anyhow::bail!("transform.timeout_secs must be > 0");
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
