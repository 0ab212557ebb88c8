//! Storage configuration and path management for qhist.
//!
//! `StorageConfig` owns every on-disk location the history subsystem touches:
//! the history file, the global key-value file, the config file, the two
//! artifact roots swept by the retention scrubber, and the log directory.
//!
//! ## Design Principles
//!
//! - **Single source of truth**: All path decisions centralized here
//! - **Testable**: `StorageConfig::with_root()` enables test injection

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{HistoryError, Result};

/// Central configuration for all qhist storage paths.
///
/// Production code uses `StorageConfig::default()` which points to `~/.qhist/`.
/// Tests use `StorageConfig::with_root(temp_dir)` for isolation.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|home| home.join(".qhist"))
            .unwrap_or_else(|| std::env::temp_dir().join(".qhist"));
        Self { root }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to the persisted run history.
    pub fn history_file(&self) -> PathBuf {
        self.root.join("workspace-query-history.json")
    }

    /// Path to the process-global key-value state (holds `lastScrubTime`).
    pub fn global_state_file(&self) -> PathBuf {
        self.root.join("global-state.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Artifact root for local runs, one subdirectory per run.
    pub fn local_queries_dir(&self) -> PathBuf {
        self.root.join("queries")
    }

    /// Artifact root for variant analyses.
    pub fn variant_analyses_dir(&self) -> PathBuf {
        self.root.join("variant-analyses")
    }

    /// Both roots swept by the retention scrubber.
    pub fn artifact_roots(&self) -> Vec<PathBuf> {
        vec![self.local_queries_dir(), self.variant_analyses_dir()]
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Creates the root, artifact roots and log directory if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.local_queries_dir(),
            self.variant_analyses_dir(),
            self.logs_dir(),
        ] {
            fs_err::create_dir_all(&dir)
                .map_err(|e| HistoryError::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(())
    }
}

/// Writes `contents` to `path` atomically using temp file + rename,
/// creating the parent directory first.
pub(crate) fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(dir)
        .map_err(|e| HistoryError::io(format!("creating {}", dir.display()), e))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| HistoryError::io(format!("creating temp file in {}", dir.display()), e))?;

    tmp.write_all(contents.as_bytes())
        .map_err(|e| HistoryError::io(format!("writing temp file for {}", path.display()), e))?;

    tmp.flush()
        .map_err(|e| HistoryError::io(format!("flushing temp file for {}", path.display()), e))?;

    tmp.persist(path).map_err(|e| {
        HistoryError::io(format!("persisting temp file to {}", path.display()), e.error)
    })?;

    Ok(())
}
