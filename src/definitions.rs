//! Declarative hack definitions
//!
//! ```json
//! [
//!   {
//!     "title": "Player",
//!     "hacks": [
//!       {
//!         "id": "noclip",
//!         "title": "NoClip",
//!         "description": "Makes the player ignore collisions",
//!         "cheat": true,
//!         "opcodes": [
//!           { "library": "GeometryDash.exe", "address": 2023850, "on": "E9 79 06 00 00", "off": "6A 14 8B CB FF" }
//!         ]
//!       }
//!     ]
//!   }
//! ]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::opcode::OpcodeDecl;
use crate::settings::SettingsError;

/// A toggle declared in a definitions file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleDefinition {
    /// Unique id of the toggle
    pub id: String,
    /// Label of the toggle
    pub title: String,
    /// Tooltip text
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Whether the toggle has side effects
    #[serde(default)]
    pub warnings: bool,
    /// Whether the toggle counts as cheating
    #[serde(default)]
    pub cheat: bool,
    /// Patches switched by the toggle
    #[serde(default)]
    pub opcodes: Vec<OpcodeDecl>,
}

/// A window and the toggles declared in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowDefinition {
    /// Window the toggles are added to
    pub title: String,
    /// Toggles in the window
    #[serde(default)]
    pub hacks: Vec<ToggleDefinition>,
}

/// Contents of a definitions file
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HackDefinitions {
    /// Windows, in file order
    pub windows: Vec<WindowDefinition>,
}

impl HackDefinitions {
    /// Parses a definitions document
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a definitions file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::AddressDecl;

    #[test]
    fn test_parse() {
        let definitions = HackDefinitions::from_json(
            r#"[
                {
                    "title": "Player",
                    "hacks": [
                        {
                            "id": "noclip",
                            "title": "NoClip",
                            "cheat": true,
                            "opcodes": [
                                { "library": "game.exe", "address": 16, "on": "90 90", "off": "74 05" },
                                { "library": "game.exe", "address": "75 ?? 8B", "on": "EB" }
                            ]
                        },
                        { "id": "practice_music", "title": "Practice Music Hack" }
                    ]
                },
                { "title": "Bypass" }
            ]"#,
        )
        .unwrap();

        assert_eq!(definitions.windows.len(), 2);
        let noclip = &definitions.windows[0].hacks[0];
        assert!(noclip.cheat);
        assert!(!noclip.warnings);
        assert_eq!(noclip.opcodes.len(), 2);
        assert_eq!(
            noclip.opcodes[1].address,
            AddressDecl::Pattern("75 ?? 8B".to_string())
        );
        assert!(definitions.windows[0].hacks[1].opcodes.is_empty());
        assert!(definitions.windows[1].hacks.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HackDefinitions::load(dir.path().join("hacks.json")).unwrap_err();
        assert!(err.is_not_found());
    }
}
