//! # Settings
//!
//! Persisted state is one JSON object: window title → component id → record. Records are read leniently, a
//! missing or mistyped field falls back to its default instead of failing the whole load.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors while reading or writing settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// File couldn't be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File isn't valid JSON, or doesn't have the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Settings must be an object keyed by window title
    #[error("settings root must be a JSON object")]
    NotAnObject,
}

impl SettingsError {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, SettingsError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// The persisted settings tree
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Settings {
    /// Sections keyed by window title or standalone hack id
    root: Map<String, Value>,
}

impl Settings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already parsed tree
    pub fn from_value(value: Value) -> Result<Self, SettingsError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(SettingsError::NotAnObject),
        }
    }

    /// Parses settings from JSON text
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Loads settings from a file. A missing file yields empty settings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, starting fresh");
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes settings to a file as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(&self.root)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Record stored under `key`
    pub fn section(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Stores `value` under `key`
    pub fn set_section(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    /// Top-level keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }
}

/// Record of a toggle component
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleRecord {
    /// Whether the toggle was on
    #[serde(default, deserialize_with = "lenient")]
    pub enabled: bool,
    /// Key code bound to the toggle
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub keybind: Option<u32>,
}

/// Deserializes a field, falling back to its default when it has the wrong shape
pub fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value.clone()).unwrap_or_else(|e| {
        warn!(%value, error = %e, "ignoring malformed setting");
        T::default()
    }))
}

/// Reads a record, using the default for anything missing
pub fn read_record<T: DeserializeOwned + Default>(id: &str, value: Option<&Value>) -> T {
    let Some(value) = value else {
        return T::default();
    };
    serde_json::from_value(value.clone()).unwrap_or_else(|e| {
        warn!(id, error = %e, "malformed record, using defaults");
        T::default()
    })
}

/// Turns a record into JSON
pub fn write_record<T: Serialize>(id: &str, record: &T) -> Value {
    serde_json::to_value(record).unwrap_or_else(|e| {
        warn!(id, error = %e, "unable to serialize record");
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_missing_keybind_stays_unset() {
        let record: ToggleRecord = read_record("noclip", Some(&json!({ "enabled": true })));
        assert_eq!(
            record,
            ToggleRecord {
                enabled: true,
                keybind: None
            }
        );
    }

    #[test]
    fn test_mistyped_fields_fall_back() {
        let record: ToggleRecord =
            read_record("noclip", Some(&json!({ "enabled": "yes", "keybind": 78 })));
        assert_eq!(
            record,
            ToggleRecord {
                enabled: false,
                keybind: Some(78)
            }
        );

        let record: ToggleRecord = read_record("noclip", Some(&json!(42)));
        assert_eq!(record, ToggleRecord::default());
        let record: ToggleRecord = read_record("noclip", None);
        assert_eq!(record, ToggleRecord::default());
    }

    #[test]
    fn test_unset_keybind_not_written() {
        let value = write_record("noclip", &ToggleRecord::default());
        assert_eq!(value, json!({ "enabled": false }));
    }

    #[test]
    fn test_root_must_be_object() {
        assert!(matches!(
            Settings::from_json("[1, 2]"),
            Err(SettingsError::NotAnObject)
        ));
        assert!(matches!(
            Settings::from_json("{"),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        // missing file is not an error
        assert_eq!(Settings::load(&path).unwrap(), Settings::new());

        let mut settings = Settings::new();
        settings.set_section("Player", json!({ "noclip": { "enabled": true } }));
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.keys().collect::<Vec<_>>(), ["Player"]);
    }

    #[test]
    fn test_error_is_not_found() {
        let err = SettingsError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
        assert!(!SettingsError::NotAnObject.is_not_found());
    }
}
