//! Durable session settings.
//!
//! The snapshot lives at the local tree's `config.json` and is written
//! atomically, so a crash mid-save leaves the previous snapshot intact. A
//! missing or corrupt file is never an error: the session starts from
//! defaults and the next save repairs it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use grove_fabric::{replace_file, FabricError};

/// Settings that survive restarts. Every field defaults, so snapshots
/// written by older builds keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Shared root to reconnect to; unset until the first join.
    #[serde(default)]
    pub shared_root: Option<PathBuf>,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_room")]
    pub room: String,

    /// Preferred roster color; unset means derive one from the name.
    #[serde(default)]
    pub color: Option<String>,

    #[serde(default)]
    pub status: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shared_root: None,
            username: default_username(),
            room: default_room(),
            color: None,
            status: String::new(),
        }
    }
}

fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "Anonymous".to_string())
}

fn default_room() -> String {
    grove_types::DEFAULT_ROOM.to_string()
}

impl SessionConfig {
    /// Loads the snapshot, falling back to defaults when the file is
    /// missing, unreadable or corrupt.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Unreadable session config, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Corrupt session config, using defaults");
                Self::default()
            }
        }
    }

    /// Writes the snapshot atomically.
    pub fn save(&self, path: &Path) -> Result<(), FabricError> {
        let pretty = serde_json::to_vec_pretty(self)?;
        replace_file(path, &pretty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = SessionConfig {
            shared_root: Some(PathBuf::from("/mnt/team")),
            username: "ada".to_string(),
            room: "build-logs".to_string(),
            color: None,
            status: "reviewing".to_string(),
        };
        config.save(&path).unwrap();

        assert_eq!(SessionConfig::load(&path), config);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::load(&dir.path().join("absent.json"));
        assert_eq!(config.room, "general");
        assert!(config.shared_root.is_none());
        assert!(!config.username.is_empty());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{ definitely not json").unwrap();
        assert_eq!(SessionConfig::load(&path), SessionConfig::default());
    }

    #[test]
    fn sparse_snapshot_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, br#"{"username":"ada"}"#).unwrap();

        let config = SessionConfig::load(&path);
        assert_eq!(config.username, "ada");
        assert_eq!(config.room, "general");
        assert!(config.color.is_none());
    }
}
