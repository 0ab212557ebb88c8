//! Run artifact directories.
//!
//! Every run that produces files on disk gets one directory under an artifact
//! root. The directory name is opaque (new ones are ULIDs); the directory
//! holds a `timestamp` marker whose content is the creation time in
//! milliseconds since the Unix epoch. The retention scrubber ages directories
//! by that marker only.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::clock::Clock;
use crate::error::{HistoryError, Result};

pub const MARKER_FILE: &str = "timestamp";

/// Creates `<root>/<ulid>` with a marker stamped at `clock.now()`.
pub fn create_run_dir(root: &Path, clock: &dyn Clock) -> Result<PathBuf> {
    let dir = root.join(ulid::Ulid::new().to_string());
    fs_err::create_dir_all(&dir)
        .map_err(|e| HistoryError::io(format!("creating {}", dir.display()), e))?;
    write_marker(&dir, clock.now().timestamp_millis())?;
    Ok(dir)
}

pub fn write_marker(dir: &Path, millis: i64) -> Result<()> {
    let marker = dir.join(MARKER_FILE);
    fs_err::write(&marker, millis.to_string())
        .map_err(|e| HistoryError::io(format!("writing {}", marker.display()), e))
}

/// Reads the creation marker. `None` when it is missing, unreadable, or not
/// an integer.
pub fn read_marker(dir: &Path) -> Option<i64> {
    let content = fs_err::read_to_string(dir.join(MARKER_FILE)).ok()?;
    content.trim().parse().ok()
}

/// Immediate children of `root`, files included. Errors for individual
/// entries are returned alongside the readable ones.
pub(crate) fn list_children(root: &Path) -> (Vec<PathBuf>, Vec<String>) {
    let mut children = Vec::new();
    let mut errors = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        match entry {
            Ok(entry) => children.push(entry.into_path()),
            Err(e) => errors.push(format!("{}: {}", root.display(), e)),
        }
    }
    children.sort();
    (children, errors)
}
