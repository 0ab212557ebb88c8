//! Process-global key-value state.
//!
//! The retention scrubber keeps its `lastScrubTime` lease here. The file-backed
//! store re-reads on every `get` so that several processes sharing one root
//! see each other's leases.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{HistoryError, Result};
use crate::storage::atomic_write;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// A JSON object on disk, one entry per key.
#[derive(Debug)]
pub struct JsonFileKeyValueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileKeyValueStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(HistoryError::io("reading global state", e)),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content)
            .map_err(|e| HistoryError::json(format!("parsing {}", self.path.display()), e))?
        {
            Value::Object(map) => Ok(map),
            other => Err(HistoryError::KeyValue(format!(
                "{} holds {} instead of an object",
                self.path.display(),
                json_type(&other)
            ))),
        }
    }
}

impl KeyValueStore for JsonFileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = match self.read_all() {
            Ok(map) => map,
            Err(e @ (HistoryError::Json { .. } | HistoryError::KeyValue(_))) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Global state is unreadable; starting it over"
                );
                Map::new()
            }
            Err(e) => return Err(e),
        };
        map.insert(key.to_string(), value);
        let content = serde_json::to_string_pretty(&Value::Object(map))
            .map_err(|e| HistoryError::json("serializing global state", e))?;
        atomic_write(&self.path, &content)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
