//! Runtime configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::settings::SettingsError;

/// Where things live and how the registry behaves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persisted toggle and hack state
    pub settings_file: PathBuf,
    /// Hack definitions
    pub definitions_file: PathBuf,
    /// Sort window components by title after init
    pub sort_components: bool,
    /// Default `tracing` filter, `RUST_LOG` takes precedence
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_file: PathBuf::from("settings.json"),
            definitions_file: PathBuf::from("hacks.json"),
            sort_components: true,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads the config, falling back to defaults if the file doesn't exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
