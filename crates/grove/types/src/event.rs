//! Room timeline events, one JSON object per log line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::default_schema_version;
use crate::stamp::now_stamp;

/// Closed set of event kinds a room log may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Chat,
    Me,
    System,
    AiPrompt,
    AiResponse,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "chat",
            EventKind::Me => "me",
            EventKind::System => "system",
            EventKind::AiPrompt => "ai_prompt",
            EventKind::AiResponse => "ai_response",
        }
    }
}

/// One row of a room's append-only event log.
///
/// Fields beyond the known set are kept in `extra` and re-emitted verbatim,
/// so rows written by newer clients survive a round trip through older ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "default_schema_version")]
    pub v: i64,
    #[serde(default = "now_stamp")]
    pub ts: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub memory_ids_used: Vec<String>,
    #[serde(default)]
    pub memory_topics_used: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_author() -> String {
    "Unknown".to_string()
}

impl Event {
    /// New event stamped with the current time and schema version.
    pub fn new(kind: EventKind, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            v: crate::codec::SCHEMA_VERSION,
            ts: now_stamp(),
            kind,
            author: author.into(),
            text: text.into(),
            provider: None,
            model: None,
            request_id: None,
            memory_ids_used: Vec::new(),
            memory_topics_used: Vec::new(),
            extra: Map::new(),
        }
    }
}
