//! User configuration for history display and artifact retention.
//!
//! Stored as `config.json` under the storage root. Every field has a default,
//! so a partial file is valid; a missing or unreadable file yields defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HistoryError, Result};
use crate::label::DEFAULT_LABEL_FORMAT;
use crate::storage::atomic_write;

pub const DEFAULT_TTL_DAYS: u32 = 30;
pub const DEFAULT_WAKE_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_THROTTLE_INTERVAL_SECS: u64 = 2 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Label template; see [`crate::label`].
    pub format: String,
    /// Artifact directories older than this many days are deleted.
    pub ttl_days: u32,
    pub wake_interval_secs: u64,
    pub throttle_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            format: DEFAULT_LABEL_FORMAT.to_string(),
            ttl_days: DEFAULT_TTL_DAYS,
            wake_interval_secs: DEFAULT_WAKE_INTERVAL_SECS,
            throttle_interval_secs: DEFAULT_THROTTLE_INTERVAL_SECS,
        }
    }
}

impl HistoryConfig {
    /// Loads the config, returning defaults if the file doesn't exist or
    /// can't be parsed.
    pub fn load(path: &Path) -> Self {
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read config; using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt config; using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| HistoryError::json("serializing config", e))?;
        atomic_write(path, &content)
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }

    pub fn wake_interval(&self) -> Duration {
        Duration::from_secs(self.wake_interval_secs)
    }

    pub fn throttle_interval(&self) -> chrono::Duration {
        chrono::Duration::from_std(Duration::from_secs(self.throttle_interval_secs))
            .unwrap_or_else(|_| chrono::Duration::days(36_500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let temp = tempdir().unwrap();
        let config = HistoryConfig::load(&temp.path().join("config.json"));
        assert_eq!(config, HistoryConfig::default());
        assert_eq!(config.max_age(), chrono::Duration::days(30));
        assert_eq!(config.wake_interval(), Duration::from_secs(3600));
        assert_eq!(config.throttle_interval(), chrono::Duration::hours(2));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"ttlDays": 7}"#).unwrap();
        let config = HistoryConfig::load(&path);
        assert_eq!(config.ttl_days, 7);
        assert_eq!(config.format, DEFAULT_LABEL_FORMAT);
    }

    #[test]
    fn test_corrupt_config_uses_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(HistoryConfig::load(&path), HistoryConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        let config = HistoryConfig {
            format: "%q".into(),
            ttl_days: 1,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(HistoryConfig::load(&path), config);
    }
}
