//! The processed-files manifest.
//!
//! A single JSON document, `{"processed_files": [...]}`, loaded in full at the
//! start of a run and rewritten in full after every completed file. Rewrites
//! go through a temp file in the same directory that is fsynced and renamed
//! over the old manifest, and the directory is fsynced afterwards, so a crash leaves either the old or the new
//! document, never a truncated one.
//!
//! Filename presence is the whole completion signal. Single writer only.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::models::ManifestEntry;
use crate::writer::sync_dir;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub processed_files: Vec<ManifestEntry>,
}

pub struct ManifestStore {
    path: PathBuf,
    manifest: Manifest,
    index: HashSet<String>,
}

impl ManifestStore {
    /// Load the manifest at `path`. A missing file is an empty manifest; an
    /// unreadable or unparseable one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let manifest = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<Manifest>(&content).with_context(|| {
                format!(
                    "Manifest is corrupt, refusing to continue: {}",
                    path.display()
                )
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read manifest: {}", path.display()))
            }
        };

        let mut index = HashSet::with_capacity(manifest.processed_files.len());
        for entry in &manifest.processed_files {
            if !index.insert(entry.filename.clone()) {
                bail!(
                    "Manifest {} lists {} more than once",
                    path.display(),
                    entry.filename
                );
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.manifest.processed_files
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.index.contains(filename)
    }

    pub fn get(&self, filename: &str) -> Option<&ManifestEntry> {
        if !self.contains(filename) {
            return None;
        }
        self.manifest
            .processed_files
            .iter()
            .find(|entry| entry.filename == filename)
    }

    /// Append `entry` and persist the whole manifest before returning.
    ///
    /// If persisting fails the in-memory manifest is left unchanged.
    pub fn append(&mut self, entry: ManifestEntry) -> Result<()> {
        if self.contains(&entry.filename) {
            bail!(
                "{} is already recorded in the manifest",
                entry.filename
            );
        }

        let filename = entry.filename.clone();
        self.manifest.processed_files.push(entry);
        if let Err(err) = self.persist() {
            self.manifest.processed_files.pop();
            return Err(err);
        }
        self.index.insert(filename);
        Ok(())
    }

    /// Write the current manifest, creating it if needed.
    fn persist(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create manifest dir: {}", dir.display()))?;

        let json = serde_json::to_string_pretty(&self.manifest)?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp manifest in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace manifest: {}", self.path.display()))?;
        sync_dir(&dir)?;

        Ok(())
    }
}
