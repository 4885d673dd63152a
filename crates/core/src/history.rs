//! Output-directory history scanning.
//!
//! Generated images land either directly in the outputs directory or in
//! one-level date subdirectories (`YYYY-MM-DD/`). The creation time is
//! parsed from the `YYYY-MM-DD_HH-MM-SS` filename prefix the workers
//! write, falling back to filesystem mtime. Sidecar metadata joining
//! happens in the api layer via `remgo_db`.

use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// File extensions listed as generated images.
const IMAGE_FILE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// One generated file, newest-first in listings.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryFile {
    /// Bare filename, the key into the metadata sidecar.
    pub filename: String,
    /// Path relative to the outputs root, `/`-separated.
    pub relative_path: String,
    pub created_epoch_seconds: i64,
}

/// Scan the outputs tree and return every image, newest first.
///
/// Walks flat files plus one level of date-named subdirectories. Ties on
/// the timestamp sort in descending filename order so the result is
/// stable.
pub fn scan_outputs(root: &Path) -> Vec<HistoryFile> {
    let mut files = Vec::new();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return files,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let dir_name = entry.file_name();
            if !is_date_dir_name(&dir_name.to_string_lossy()) {
                continue;
            }
            if let Ok(sub) = std::fs::read_dir(&path) {
                for sub_entry in sub.flatten() {
                    push_image(root, &sub_entry.path(), &mut files);
                }
            }
        } else {
            push_image(root, &path, &mut files);
        }
    }

    files.sort_by(|a, b| {
        b.created_epoch_seconds
            .cmp(&a.created_epoch_seconds)
            .then_with(|| b.filename.cmp(&a.filename))
    });
    files
}

/// Scan and cap at `max(1, limit)` entries.
pub fn load_history(root: &Path, limit: usize) -> Vec<HistoryFile> {
    let mut files = scan_outputs(root);
    files.truncate(limit.max(1));
    files
}

fn push_image(root: &Path, path: &Path, out: &mut Vec<HistoryFile>) {
    let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if !is_image {
        return;
    }

    let filename = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return,
    };

    let created = parse_timestamp_prefix(&filename).unwrap_or_else(|| file_mtime_epoch(path));

    let relative_path = path
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| filename.clone());

    out.push(HistoryFile {
        filename,
        relative_path,
        created_epoch_seconds: created,
    });
}

/// Parse a `YYYY-MM-DD_HH-MM-SS` filename prefix into epoch seconds.
pub fn parse_timestamp_prefix(filename: &str) -> Option<i64> {
    let prefix = filename.get(..19)?;
    NaiveDateTime::parse_from_str(prefix, "%Y-%m-%d_%H-%M-%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Whether a directory name is a `YYYY-MM-DD` date bucket.
fn is_date_dir_name(name: &str) -> bool {
    NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok()
}

fn file_mtime_epoch(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
