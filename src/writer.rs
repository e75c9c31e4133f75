//! Year-partitioned Parquet writer.
//!
//! Each batch is split by the year of its timestamp field and every group is
//! written to `<entity_root>/<partition_column>=<year>/part_<micros>_<uuid>.parquet`.
//! Records without a usable timestamp go to the
//! [`NULL_PARTITION`] directory instead of being dropped.
//!
//! A batch is all-or-nothing: groups are encoded into hidden temp files,
//! fsynced, and only renamed into place once every group has been written.
//! Partition directories are fsynced after the renames so a completed batch
//! survives a power loss.

use anyhow::{Context, Result};
use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int32Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{FieldValue, Record};

/// Directory value used for records whose partition key could not be derived.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Destination for flushed batches.
///
/// The file ingestor only depends on this trait; [`ParquetBatchWriter`] is
/// the production implementation.
pub trait BatchSink {
    /// Persist one batch durably. An error means nothing from the batch is
    /// visible and no temp files remain.
    fn write_batch(&mut self, batch: &[Record]) -> Result<BatchReport>;
}

/// What a single flush produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub records: u64,
    /// Records written per partition key (`None` is the null partition).
    pub partitions: BTreeMap<Option<i32>, u64>,
    pub files: Vec<PathBuf>,
}

pub struct ParquetBatchWriter {
    root: PathBuf,
    timestamp_field: String,
    partition_column: String,
    timestamp_column: String,
    compression: Compression,
}

impl ParquetBatchWriter {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            root: config.entity_root(),
            timestamp_field: config.ingest.timestamp_field.clone(),
            partition_column: config.ingest.partition_column.clone(),
            timestamp_column: config.ingest.timestamp_column.clone(),
            compression: config.ingest.parquet_compression()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one partition key.
    pub fn partition_dir(&self, key: Option<i32>) -> PathBuf {
        let value = match key {
            Some(year) => year.to_string(),
            None => NULL_PARTITION.to_string(),
        };
        self.root.join(format!("{}={}", self.partition_column, value))
    }

    fn write_group(&self, tmp_path: &Path, group: &[(&Record, Option<NaiveDateTime>)]) -> Result<()> {
        let batch = self.to_record_batch(group)?;

        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();

        let file = File::create(tmp_path)
            .with_context(|| format!("Failed to create part file: {}", tmp_path.display()))?;
        let handle = file.try_clone()?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        handle
            .sync_all()
            .with_context(|| format!("Failed to sync part file: {}", tmp_path.display()))?;
        Ok(())
    }

    fn to_record_batch(&self, group: &[(&Record, Option<NaiveDateTime>)]) -> Result<RecordBatch> {
        let columns = infer_columns(
            group.iter().map(|(record, _)| *record),
            &[&self.partition_column, &self.timestamp_column],
        );

        let mut fields = Vec::with_capacity(columns.len() + 2);
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 2);

        for (name, kind) in &columns {
            fields.push(Field::new(name.as_str(), kind.data_type(), true));
            arrays.push(build_column(name, *kind, group.iter().map(|(record, _)| *record)));
        }

        let mut ts = TimestampMicrosecondBuilder::with_capacity(group.len());
        let mut year = Int32Builder::with_capacity(group.len());
        for (_, parsed) in group {
            ts.append_option(parsed.map(|dt| dt.and_utc().timestamp_micros()));
            year.append_option(parsed.map(|dt| dt.year()));
        }
        fields.push(Field::new(
            self.timestamp_column.as_str(),
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        ));
        arrays.push(Arc::new(ts.finish()));
        fields.push(Field::new(self.partition_column.as_str(), DataType::Int32, true));
        arrays.push(Arc::new(year.finish()));

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }
}

impl BatchSink for ParquetBatchWriter {
    fn write_batch(&mut self, batch: &[Record]) -> Result<BatchReport> {
        let mut groups: BTreeMap<Option<i32>, Vec<(&Record, Option<NaiveDateTime>)>> =
            BTreeMap::new();
        for record in batch {
            let parsed = record.timestamp(&self.timestamp_field);
            groups
                .entry(parsed.map(|dt| dt.year()))
                .or_default()
                .push((record, parsed));
        }

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(groups.len());
        let mut report = BatchReport::default();

        for (key, group) in &groups {
            let dir = self.partition_dir(*key);
            let written = std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create partition dir: {}", dir.display()))
                .and_then(|_| {
                    let name = part_file_name();
                    let tmp = dir.join(format!(".{}.tmp", name));
                    let result = self.write_group(&tmp, group);
                    // Record the temp path even on failure so it gets cleaned up.
                    staged.push((tmp, dir.join(name)));
                    result
                });

            if let Err(err) = written {
                discard(&staged);
                return Err(err.context(format!(
                    "Failed to write partition {}",
                    dir.display()
                )));
            }

            report.partitions.insert(*key, group.len() as u64);
            report.records += group.len() as u64;
        }

        report.files = publish(&staged)?;

        tracing::debug!(
            records = report.records,
            files = report.files.len(),
            "batch written"
        );
        Ok(report)
    }
}

/// Rename staged temp files into place, then fsync their directories.
///
/// On failure every part published by this call is removed again, along
/// with the remaining temp files.
fn publish(staged: &[(PathBuf, PathBuf)]) -> Result<Vec<PathBuf>> {
    let mut published = Vec::with_capacity(staged.len());
    for (i, (tmp, dest)) in staged.iter().enumerate() {
        if let Err(err) = std::fs::rename(tmp, dest) {
            for path in &published {
                let _ = std::fs::remove_file(path);
            }
            discard(&staged[i..]);
            return Err(anyhow::Error::new(err)
                .context(format!("Failed to publish part file: {}", dest.display())));
        }
        published.push(dest.clone());
    }

    let dirs: BTreeSet<&Path> = published.iter().filter_map(|p| p.parent()).collect();
    for dir in dirs {
        if let Err(err) = sync_dir(dir) {
            for path in &published {
                let _ = std::fs::remove_file(path);
            }
            return Err(err);
        }
    }
    Ok(published)
}

/// Make renames inside `dir` durable.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("Failed to sync directory: {}", dir.display()))
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = std::fs::remove_file(tmp);
    }
}

/// Unique across runs and processes: wall-clock microseconds plus a random UUID.
fn part_file_name() -> String {
    format!(
        "part_{}_{}.parquet",
        Utc::now().timestamp_micros(),
        Uuid::new_v4().simple()
    )
}

/// Inferred Arrow type of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
}

impl ColumnKind {
    fn of(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => ColumnKind::Null,
            FieldValue::Bool(_) => ColumnKind::Bool,
            FieldValue::Int(_) => ColumnKind::Int,
            FieldValue::Float(_) => ColumnKind::Float,
            FieldValue::Text(_) => ColumnKind::Text,
        }
    }

    fn merge(self, other: Self) -> Self {
        use ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Null, b) => b,
            (a, Null) => a,
            (Int, Float) | (Float, Int) => Float,
            _ => Text,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Bool => DataType::Boolean,
            ColumnKind::Int => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Null | ColumnKind::Text => DataType::Utf8,
        }
    }
}

/// Union of field names in first-seen order, with merged types.
fn infer_columns<'a>(
    records: impl Iterator<Item = &'a Record>,
    reserved: &[&String],
) -> Vec<(String, ColumnKind)> {
    let mut columns: Vec<(String, ColumnKind)> = Vec::new();
    for record in records {
        for (name, value) in record.fields() {
            if reserved.iter().any(|r| *r == name) {
                continue;
            }
            let kind = ColumnKind::of(value);
            match columns.iter_mut().find(|(existing, _)| existing == name) {
                Some((_, current)) => *current = current.merge(kind),
                None => columns.push((name.clone(), kind)),
            }
        }
    }
    columns
}

fn build_column<'a>(
    name: &str,
    kind: ColumnKind,
    records: impl ExactSizeIterator<Item = &'a Record>,
) -> ArrayRef {
    let len = records.len();
    match kind {
        ColumnKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(len);
            for record in records {
                builder.append_option(match record.get(name) {
                    Some(FieldValue::Bool(b)) => Some(*b),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Int => {
            let mut builder = Int64Builder::with_capacity(len);
            for record in records {
                builder.append_option(match record.get(name) {
                    Some(FieldValue::Int(i)) => Some(*i),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Float => {
            let mut builder = Float64Builder::with_capacity(len);
            for record in records {
                builder.append_option(match record.get(name) {
                    Some(FieldValue::Float(f)) => Some(*f),
                    Some(FieldValue::Int(i)) => Some(*i as f64),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Null | ColumnKind::Text => {
            let mut builder = StringBuilder::new();
            for record in records {
                builder.append_option(record.get(name).and_then(FieldValue::render));
            }
            Arc::new(builder.finish())
        }
    }
}
