//! Memory entries, append-only rows of the scoped knowledge stores.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::default_schema_version;
use crate::stamp::now_stamp;

/// Physical store an entry belongs to. Scopes never merge implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Private,
    Repo,
    Global,
}

impl MemoryScope {
    pub const ALL: [MemoryScope; 3] = [MemoryScope::Private, MemoryScope::Repo, MemoryScope::Global];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Private => "private",
            MemoryScope::Repo => "repo",
            MemoryScope::Global => "global",
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical confidence levels; anything else is rejected at the codec gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    #[default]
    Med,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Med => "med",
            Confidence::High => "high",
        }
    }
}

/// One stored memory row. The id is assigned once at write time and never
/// changes; everything else defaults so sparse rows from older writers still
/// decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    #[serde(default = "default_schema_version")]
    pub v: i64,
    pub id: String,
    #[serde(default = "now_stamp")]
    pub ts: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_event_ref: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Filled by the reader from the store a row came out of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<MemoryScope>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_author() -> String {
    "Unknown".to_string()
}

fn default_topic() -> String {
    "general".to_string()
}
