//! The on-disk archive catalog.
//!
//! Archives live flat in the backups directory as `backup-<ts>.tar.gz`;
//! the embedded timestamp makes lexicographic order chronological, so
//! "newest first" is a reverse name sort.

use crate::error::ServiceError;
use crate::utils::format_bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MAX_BACKUPS: usize = 7;

const ARCHIVE_SUFFIX: &str = ".tar.gz";

#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub filename: String,
    pub size: u64,
    #[serde(rename = "sizeFormatted")]
    pub size_formatted: String,
    pub date: String,
}

fn archive_names(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(ARCHIVE_SUFFIX))
        .collect();
    names.sort();
    names.reverse();
    names
}

/// A bare filename, no path separators. Anything else cannot name an archive.
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

pub fn list(dir: &Path) -> Vec<BackupEntry> {
    archive_names(dir)
        .into_iter()
        .filter_map(|filename| {
            let meta = std::fs::metadata(dir.join(&filename)).ok()?;
            let date = meta
                .modified()
                .ok()
                .map(|t| {
                    let dt: chrono::DateTime<chrono::Utc> = t.into();
                    dt.to_rfc3339()
                })
                .unwrap_or_default();
            Some(BackupEntry {
                size: meta.len(),
                size_formatted: format_bytes(meta.len()),
                date,
                filename,
            })
        })
        .collect()
}

pub fn delete(dir: &Path, filename: &str) -> Result<(), ServiceError> {
    if !is_plain_filename(filename) {
        return Err(ServiceError::ArchiveNotFound(filename.into()));
    }
    let path = dir.join(filename);
    if !path.is_file() {
        return Err(ServiceError::ArchiveNotFound(filename.into()));
    }
    std::fs::remove_file(&path)?;
    Ok(())
}

/// Resolve a catalog filename to its on-disk path. Performs no existence
/// check; callers opening the file handle the missing case.
pub fn resolve_path(dir: &Path, filename: &str) -> Result<PathBuf, ServiceError> {
    if !is_plain_filename(filename) {
        return Err(ServiceError::ArchiveNotFound(filename.into()));
    }
    Ok(dir.join(filename))
}

/// Drop archives beyond the `keep` newest. Individual deletion failures are
/// logged and swallowed; rotation never fails the backup that triggered it.
pub fn rotate(dir: &Path, keep: usize) {
    for stale in archive_names(dir).into_iter().skip(keep) {
        match std::fs::remove_file(dir.join(&stale)) {
            Ok(()) => tracing::info!(filename = %stale, "Removed stale backup"),
            Err(err) => {
                tracing::warn!(filename = %stale, error = %err, "Failed to remove stale backup")
            }
        }
    }
}
