//! Reading and writing the persisted run history.
//!
//! # File Format
//!
//! ```json
//! { "version": 2, "queries": [ { "t": "local", "id": "...", ... } ] }
//! ```
//!
//! Writes are atomic (temp file + rename). Reads fail closed: a file that
//! cannot be parsed, or that carries a version this build does not know, is
//! an error rather than an empty history, so a newer format is never
//! silently overwritten.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HistoryError, Result};
use crate::item::{HistoryItem, RunKind};
use crate::status::QueryStatus;
use crate::storage::atomic_write;

pub const HISTORY_VERSION: u32 = 2;

#[derive(Serialize)]
struct HistoryFileOut<'a> {
    version: u32,
    queries: &'a [&'a HistoryItem],
}

#[derive(Deserialize)]
struct HistoryFileIn {
    version: u32,
    #[serde(default)]
    queries: serde_json::Value,
}

pub fn write_history<'a>(
    path: &Path,
    items: impl IntoIterator<Item = &'a HistoryItem>,
) -> Result<()> {
    let items: Vec<&HistoryItem> = items.into_iter().collect();
    let file = HistoryFileOut {
        version: HISTORY_VERSION,
        queries: &items,
    };
    let content = serde_json::to_string_pretty(&file)
        .map_err(|e| HistoryError::json("serializing query history", e))?;
    atomic_write(path, &content)?;
    debug!(path = %path.display(), count = items.len(), "Wrote query history");
    Ok(())
}

/// Loads history from `path`.
///
/// A missing or blank file is an empty history. Local runs still marked in
/// progress are dropped: the evaluation that owned them died with the
/// previous process.
pub fn read_history(path: &Path) -> Result<Vec<HistoryItem>> {
    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No query history file");
            return Ok(Vec::new());
        }
        Err(e) => return Err(HistoryError::io("reading query history", e)),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let context = || format!("parsing {}", path.display());
    let file: HistoryFileIn =
        serde_json::from_str(&content).map_err(|e| HistoryError::json(context(), e))?;

    if file.version != HISTORY_VERSION {
        return Err(HistoryError::UnsupportedHistoryVersion {
            path: path.to_path_buf(),
            found: file.version,
            supported: HISTORY_VERSION,
        });
    }

    let items: Vec<HistoryItem> = match file.queries {
        serde_json::Value::Null => Vec::new(),
        queries => serde_json::from_value(queries).map_err(|e| HistoryError::json(context(), e))?,
    };

    let total = items.len();
    let items: Vec<HistoryItem> = items
        .into_iter()
        .filter(|item| !(item.kind() == RunKind::Local && item.status() == QueryStatus::InProgress))
        .collect();
    if items.len() != total {
        info!(
            dropped = total - items.len(),
            "Dropped local runs left in progress by a previous session"
        );
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::test_support::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip_each_kind() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("history.json");

        let local = completed_local("l", "FindBugs", "db-a", 0, 12);
        let mut remote = remote("r", "RemoteQ", 10);
        remote
            .apply_status(QueryStatus::Failed, Some("boom".into()), None)
            .unwrap();
        let mut va = variant_analysis("v", 99, "VaQ", 20);
        va.set_user_specified_label(Some("mine".into()));

        write_history(&path, [&local, &remote, &va]).unwrap();
        let loaded = read_history(&path).unwrap();
        assert_eq!(loaded, vec![local, remote, va]);
    }

    #[test]
    fn test_written_file_is_versioned_and_tagged() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("history.json");
        write_history(&path, [&remote("r", "q", 0)]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 2);
        assert_eq!(raw["queries"][0]["t"], "remote");
        assert_eq!(raw["queries"][0]["queryFilePath"], "/queries/q.ql");
    }

    #[test]
    fn test_missing_and_blank_files_are_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("history.json");
        assert!(read_history(&path).unwrap().is_empty());
        std::fs::write(&path, "  \n").unwrap();
        assert!(read_history(&path).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_version_fails() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("history.json");
        std::fs::write(&path, r#"{"version": 3, "queries": []}"#).unwrap();
        match read_history(&path) {
            Err(HistoryError::UnsupportedHistoryVersion { found, supported, .. }) => {
                assert_eq!(found, 3);
                assert_eq!(supported, HISTORY_VERSION);
            }
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_fails() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("history.json");
        std::fs::write(&path, r#"{"version": 2, "queries": [ "#).unwrap();
        assert!(matches!(read_history(&path), Err(HistoryError::Json { .. })));
    }

    #[test]
    fn test_drops_in_progress_local_runs() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("history.json");
        let running = local("running", "q", "db", 0);
        let done = completed_local("done", "q", "db", 1, 1);
        let remote_running = remote("r", "q", 2);
        write_history(&path, [&running, &done, &remote_running]).unwrap();

        let ids: Vec<String> = read_history(&path)
            .unwrap()
            .iter()
            .map(|i| i.id().to_string())
            .collect();
        assert_eq!(ids, vec!["done", "r"]);
    }
}
