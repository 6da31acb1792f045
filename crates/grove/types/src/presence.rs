//! Presence snapshots, one JSON document per identity file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::default_schema_version;
use crate::names::RoomName;

/// Full state of one participant, replaced atomically on every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    #[serde(default = "default_schema_version")]
    pub v: i64,
    #[serde(default = "default_display_name")]
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Epoch seconds of the last heartbeat; readers fall back to file mtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_display_name() -> String {
    "Anonymous".to_string()
}

fn default_color() -> String {
    "white".to_string()
}

impl PresenceSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            v: crate::codec::SCHEMA_VERSION,
            name: name.into(),
            color: default_color(),
            status: String::new(),
            room: None,
            last_seen: None,
            client_id: None,
            extra: Map::new(),
        }
    }

    /// Fills the gaps a sparse snapshot may carry: blank names collapse to
    /// the anonymous default, the room falls back to the directory it was
    /// read from, a missing last-seen takes the file's mtime.
    pub fn normalize(&mut self, fallback_room: &RoomName, fallback_last_seen: f64) {
        let trimmed = self.name.trim();
        self.name = if trimmed.is_empty() {
            default_display_name()
        } else {
            trimmed.to_string()
        };
        self.room = Some(match self.room.as_deref() {
            Some(raw) => RoomName::coerce(raw).as_str().to_string(),
            None => fallback_room.as_str().to_string(),
        });
        if self.last_seen.is_none() {
            self.last_seen = Some(fallback_last_seen);
        }
    }

    /// True when the last heartbeat landed within the freshness window.
    pub fn is_live(&self, now_epoch: f64, window: Duration) -> bool {
        self.last_seen
            .is_some_and(|seen| now_epoch - seen < window.as_secs_f64())
    }
}
