use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A candidate file sitting in the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub path: PathBuf,
}

/// List inbox files whose name matches `pattern`, sorted by name.
///
/// Only the top level of the inbox is scanned; hidden files are ignored.
pub fn discover(inbox: &Path, pattern: &str) -> Result<Vec<SourceFile>> {
    let matcher = build_matcher(pattern)?;

    if !inbox.exists() {
        tracing::warn!(inbox = %inbox.display(), "inbox does not exist");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(inbox).min_depth(1).max_depth(1) {
        let entry =
            entry.with_context(|| format!("Failed to list inbox: {}", inbox.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => {
                tracing::warn!(
                    path = %entry.path().display(),
                    "skipping inbox file with a non-UTF-8 name"
                );
                continue;
            }
        };
        if name.starts_with('.') || !matcher.is_match(&name) {
            continue;
        }

        files.push(SourceFile {
            name,
            path: entry.into_path(),
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(files)
}

/// Move `file` into `processed_dir`, keeping its name. An existing file of
/// the same name in the archive is replaced.
pub fn archive(file: &SourceFile, processed_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(processed_dir).with_context(|| {
        format!(
            "Failed to create processed dir: {}",
            processed_dir.display()
        )
    })?;
    let dest = processed_dir.join(&file.name);

    if std::fs::rename(&file.path, &dest).is_err() {
        // Cross-device moves: copy then remove.
        std::fs::copy(&file.path, &dest).with_context(|| {
            format!(
                "Failed to archive {} to {}",
                file.path.display(),
                dest.display()
            )
        })?;
        std::fs::remove_file(&file.path)
            .with_context(|| format!("Failed to remove archived input: {}", file.path.display()))?;
    }

    Ok(dest)
}

/// Hex SHA-256 of a file's bytes, comparable with the manifest's `content_sha256`.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

fn build_matcher(pattern: &str) -> Result<GlobMatcher> {
    Ok(Glob::new(pattern)
        .with_context(|| format!("Invalid inbox pattern: '{}'", pattern))?
        .compile_matcher())
}
