//! Scoped append-only memory stores.
//!
//! Each scope (private, repo, global) is one JSONL file; scopes are
//! physically separate and only ever combined when a caller names several
//! at once. Writes go through the locked appender, reads skip rows the
//! codec rejects, and duplicate detection is a hint for the caller, never
//! a gate on the write path.

#![deny(unsafe_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use grove_fabric::{FabricError, LockedAppender, LogCursor, LogReader};
use grove_types::stamp::now_stamp;
use grove_types::{codec, Confidence, MemoryEntry, MemoryScope, SCHEMA_VERSION};

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error("memory scope {0} has no backing file configured")]
    ScopeUnavailable(MemoryScope),

    #[error("memory encode error: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Encode(err.to_string())
    }
}

/// Duplicate-hint policy.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Overlap score at or above which an existing entry is surfaced.
    pub duplicate_threshold: f64,
    /// Maximum number of hints returned.
    pub duplicate_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.8,
            duplicate_limit: 3,
        }
    }
}

/// Fields the caller supplies for a new entry; id and timestamp are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub author: String,
    pub summary: String,
    pub topic: String,
    pub confidence: Confidence,
    pub source: String,
    pub room: String,
    pub origin_event_ref: Option<String>,
    pub tags: Vec<String>,
}

impl NewMemory {
    pub fn new(author: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            summary: summary.into(),
            topic: "general".to_string(),
            confidence: Confidence::default(),
            source: String::new(),
            room: String::new(),
            origin_event_ref: None,
            tags: Vec::new(),
        }
    }
}

/// A possible duplicate of a draft, with its overlap score.
#[derive(Debug, Clone)]
pub struct DuplicateHint {
    pub score: f64,
    pub entry: MemoryEntry,
}

/// Store over one file per scope.
pub struct MemoryStore {
    paths: BTreeMap<MemoryScope, PathBuf>,
    appender: LockedAppender,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(
        paths: BTreeMap<MemoryScope, PathBuf>,
        appender: LockedAppender,
        config: MemoryConfig,
    ) -> Self {
        Self {
            paths,
            appender,
            config,
        }
    }

    fn path_for(&self, scope: MemoryScope) -> Result<&Path, MemoryError> {
        self.paths
            .get(&scope)
            .map(PathBuf::as_path)
            .ok_or(MemoryError::ScopeUnavailable(scope))
    }

    /// Appends a new entry to the scope's file, assigning a stable id and
    /// the current timestamp. Confidence is already canonical by type.
    pub async fn add(&self, scope: MemoryScope, draft: NewMemory) -> Result<MemoryEntry, MemoryError> {
        let entry = MemoryEntry {
            v: SCHEMA_VERSION,
            id: next_memory_id(),
            ts: now_stamp(),
            author: draft.author,
            summary: draft.summary,
            topic: if draft.topic.trim().is_empty() {
                "general".to_string()
            } else {
                draft.topic
            },
            confidence: draft.confidence,
            source: draft.source,
            room: draft.room,
            origin_event_ref: draft.origin_event_ref,
            tags: draft.tags,
            scope: Some(scope),
            extra: serde_json::Map::new(),
        };
        let line = codec::encode_memory(&entry)?;
        self.appender.append_line(self.path_for(scope)?, &line).await?;
        debug!(id = %entry.id, scope = %scope, "Stored memory entry");
        Ok(entry)
    }

    /// All decodable entries of the named scopes, in file order per scope.
    /// Rows the codec rejects are skipped; a missing file is an empty scope.
    pub fn load(&self, scopes: &[MemoryScope]) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut entries = Vec::new();
        for &scope in scopes {
            let reader = LogReader::open(self.path_for(scope)?);
            let mut cursor = LogCursor::default();
            for line in reader.read_new(&mut cursor)? {
                if let Some(mut entry) = codec::decode_memory(&line) {
                    entry.scope.get_or_insert(scope);
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Case-insensitive substring search over summary, topic, tags and
    /// source.
    pub fn search(
        &self,
        scopes: &[MemoryScope],
        query: &str,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .load(scopes)?
            .into_iter()
            .filter(|entry| haystack(entry).contains(&needle))
            .collect())
    }

    /// Most recent entries first, across the named scopes.
    pub fn list_recent(
        &self,
        scopes: &[MemoryScope],
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut entries = self.load(scopes)?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Entries that look like duplicates of `draft`, best match first.
    ///
    /// Scoring is a token-overlap ratio against the draft summary with a
    /// small bonus for a matching topic. This is advisory only; the caller
    /// decides whether to store anyway.
    pub fn duplicate_hints(
        &self,
        scopes: &[MemoryScope],
        draft: &NewMemory,
    ) -> Result<Vec<DuplicateHint>, MemoryError> {
        let draft_tokens = tokenize(&draft.summary);
        if draft_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut hints = Vec::new();
        for entry in self.load(scopes)? {
            let overlap = draft_tokens
                .intersection(&tokenize(&entry.summary))
                .count() as f64
                / draft_tokens.len() as f64;
            let topic_bonus = if entry.topic.eq_ignore_ascii_case(draft.topic.trim()) {
                0.08
            } else {
                0.0
            };
            let score = overlap + topic_bonus;
            if score >= self.config.duplicate_threshold {
                hints.push(DuplicateHint { score, entry });
            }
        }
        hints.sort_by(|a, b| b.score.total_cmp(&a.score));
        hints.truncate(self.config.duplicate_limit);
        Ok(hints)
    }
}

fn haystack(entry: &MemoryEntry) -> String {
    format!(
        "{} {} {} {}",
        entry.summary,
        entry.topic,
        entry.tags.join(" "),
        entry.source
    )
    .to_lowercase()
}

/// Lowercase alphanumeric runs of length two or more.
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| token.len() >= 2)
        .map(str::to_string)
        .collect()
}

fn next_memory_id() -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("mem_{}_{}", chrono::Utc::now().timestamp(), &nonce[..6])
}
