//! Presence over a shared directory: one file per participant.
//!
//! Publishing replaces the identity's file atomically, so a presence
//! document is always internally consistent. Listing scans the directory
//! and decodes every file independently: a reader skips what it cannot
//! decode, deletes files whose mtime fell past the freshness window and
//! quarantines files that keep failing, so one poisoned record can never
//! blank out the roster.
//!
//! Identities double as filenames. Only parsed [`PresenceId`]s are accepted
//! here, which makes traversal impossible by construction.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use grove_fabric::{replace_file, FabricError};
use grove_types::stamp::epoch_seconds;
use grove_types::{codec, PresenceId, PresenceSnapshot, RoomName};

/// Terminal palette a display name hashes into.
pub const PALETTE: [&str; 13] = [
    "green",
    "cyan",
    "magenta",
    "yellow",
    "blue",
    "red",
    "white",
    "brightgreen",
    "brightcyan",
    "brightmagenta",
    "brightyellow",
    "brightblue",
    "brightred",
];

/// Deterministic palette color for a display name.
pub fn color_for(name: &str) -> &'static str {
    let digest = blake3::hash(name.as_bytes());
    PALETTE[digest.as_bytes()[0] as usize % PALETTE.len()]
}

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("presence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error("presence encode error: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for PresenceError {
    fn from(err: serde_json::Error) -> Self {
        PresenceError::Encode(err.to_string())
    }
}

/// Freshness and poison-handling policy.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Window within which a last-seen stamp counts as online; files whose
    /// mtime falls past it are deleted opportunistically.
    pub freshness: Duration,
    /// Consecutive decode failures before a file is moved aside.
    pub quarantine_after: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(30),
            quarantine_after: 3,
        }
    }
}

/// Presence store for one room's presence directory.
pub struct PresenceStore {
    dir: PathBuf,
    room: RoomName,
    config: PresenceConfig,
    strikes: Mutex<HashMap<PathBuf, u32>>,
}

impl PresenceStore {
    pub fn new(dir: impl Into<PathBuf>, room: RoomName, config: PresenceConfig) -> Self {
        Self {
            dir: dir.into(),
            room,
            config,
            strikes: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    fn file_for(&self, identity: &PresenceId) -> PathBuf {
        self.dir.join(identity.as_str())
    }

    /// Replaces the identity's presence document atomically. Peers see the
    /// previous document or this one, never a torn write.
    pub async fn publish(
        &self,
        identity: &PresenceId,
        snapshot: &PresenceSnapshot,
    ) -> Result<(), PresenceError> {
        let document = codec::encode_presence(snapshot)?;
        replace_file(&self.file_for(identity), document.as_bytes())?;
        debug!(identity = %identity, room = %self.room, "Published presence");
        Ok(())
    }

    /// Removes the identity's file; missing is fine.
    pub async fn remove(&self, identity: &PresenceId) -> Result<(), PresenceError> {
        match fs::remove_file(self.file_for(identity)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Scans the directory and returns the online participants, keyed by
    /// identity and sorted for stable output.
    ///
    /// Per-file problems never fail the listing: unreadable files are
    /// skipped, undecodable files earn a strike (and are eventually
    /// quarantined), files stale by mtime are deleted.
    pub async fn list_live(
        &self,
    ) -> Result<Vec<(PresenceId, PresenceSnapshot)>, PresenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let now = epoch_seconds();
        let mut live = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Dotfiles are temp and quarantine sidecars, not records.
            if name.starts_with('.') {
                continue;
            }
            let Ok(identity) = PresenceId::parse(name) else {
                debug!(file = name, "Ignoring foreign file in presence directory");
                continue;
            };
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Unstattable presence file, skipping");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let mtime = meta
                .modified()
                .ok()
                .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
                .map(|age| age.as_secs_f64())
                .unwrap_or(now);
            if now - mtime >= self.config.freshness.as_secs_f64() {
                debug!(path = %path.display(), "Removing stale presence file");
                if let Err(err) = fs::remove_file(&path) {
                    if err.kind() != ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %err, "Failed to remove stale presence file");
                    }
                }
                self.clear_strikes(&path).await;
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Unreadable presence file, skipping");
                    continue;
                }
            };
            match codec::decode_presence(&raw) {
                Some(mut snapshot) => {
                    self.clear_strikes(&path).await;
                    snapshot.normalize(&self.room, mtime);
                    if snapshot.is_live(now, self.config.freshness) {
                        live.push((identity, snapshot));
                    }
                }
                None => self.strike(&path).await,
            }
        }
        live.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(live)
    }

    async fn clear_strikes(&self, path: &Path) {
        self.strikes.lock().await.remove(path);
    }

    /// Counts a decode failure; past the budget the file is renamed to a
    /// quarantine sidecar (deleted if even that fails) so it stops costing
    /// every future scan.
    async fn strike(&self, path: &Path) {
        let mut strikes = self.strikes.lock().await;
        let count = strikes.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        if *count < self.config.quarantine_after {
            warn!(
                path = %path.display(),
                strikes = *count,
                "Malformed presence file, skipping"
            );
            return;
        }
        strikes.remove(path);
        drop(strikes);
        quarantine(path);
    }
}

fn quarantine(path: &Path) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("presence");
    let aside = path.with_file_name(format!(".{name}.quarantine"));
    match fs::rename(path, &aside) {
        Ok(()) => warn!(
            from = %path.display(),
            to = %aside.display(),
            "Quarantined poison presence file"
        ),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Quarantine rename failed, removing file"
            );
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use grove_types::stamp::epoch_seconds;

    use super::*;

    fn store(dir: &Path) -> PresenceStore {
        PresenceStore::new(dir, RoomName::default(), PresenceConfig::default())
    }

    fn id(raw: &str) -> PresenceId {
        PresenceId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn publish_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut snapshot = PresenceSnapshot::new("Ada");
        snapshot.status = "building".to_string();
        snapshot.last_seen = Some(epoch_seconds());
        store.publish(&id("ada"), &snapshot).await.unwrap();

        let live = store.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, id("ada"));
        assert_eq!(live[0].1.name, "Ada");
        assert_eq!(live[0].1.status, "building");
        assert_eq!(live[0].1.room.as_deref(), Some("general"));
    }

    #[tokio::test]
    async fn republish_replaces_not_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        for status in ["one", "two", "three"] {
            let mut snapshot = PresenceSnapshot::new("Ada");
            snapshot.status = status.to_string();
            snapshot.last_seen = Some(epoch_seconds());
            store.publish(&id("ada"), &snapshot).await.unwrap();
        }

        let live = store.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].1.status, "three");
    }

    #[tokio::test]
    async fn old_last_seen_classifies_offline_without_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut snapshot = PresenceSnapshot::new("Ada");
        snapshot.last_seen = Some(epoch_seconds() - 3600.0);
        store.publish(&id("ada"), &snapshot).await.unwrap();

        // The file is fresh by mtime, so it stays, but the record is offline.
        assert!(store.list_live().await.unwrap().is_empty());
        assert!(dir.path().join("ada").exists());
    }

    #[tokio::test]
    async fn mtime_stale_files_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresenceStore::new(
            dir.path(),
            RoomName::default(),
            PresenceConfig {
                freshness: Duration::ZERO,
                ..PresenceConfig::default()
            },
        );

        let snapshot = PresenceSnapshot::new("Ada");
        store.publish(&id("ada"), &snapshot).await.unwrap();
        assert!(store.list_live().await.unwrap().is_empty());
        assert!(!dir.path().join("ada").exists());
    }

    #[tokio::test]
    async fn garbage_file_is_skipped_and_eventually_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut snapshot = PresenceSnapshot::new("Ada");
        snapshot.last_seen = Some(epoch_seconds());
        store.publish(&id("ada"), &snapshot).await.unwrap();
        fs::write(dir.path().join("gremlin"), b"{ not json").unwrap();

        // Valid records keep listing while the poison file earns strikes.
        for _ in 0..2 {
            let live = store.list_live().await.unwrap();
            assert_eq!(live.len(), 1);
            assert!(dir.path().join("gremlin").exists());
        }

        // Third failure moves it aside.
        store.list_live().await.unwrap();
        assert!(!dir.path().join("gremlin").exists());
        assert!(dir.path().join(".gremlin.quarantine").exists());

        // Quarantined sidecars are invisible to later scans.
        assert_eq!(store.list_live().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovered_file_resets_its_strikes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        fs::write(dir.path().join("flaky"), b"{ not json").unwrap();
        store.list_live().await.unwrap();
        store.list_live().await.unwrap();

        // A good write lands before the third strike.
        let mut snapshot = PresenceSnapshot::new("Flaky");
        snapshot.last_seen = Some(epoch_seconds());
        store.publish(&id("flaky"), &snapshot).await.unwrap();
        assert_eq!(store.list_live().await.unwrap().len(), 1);

        // Strikes restarted from zero, so two more bad reads do not
        // quarantine it.
        fs::write(dir.path().join("flaky"), b"{ not json").unwrap();
        store.list_live().await.unwrap();
        store.list_live().await.unwrap();
        assert!(dir.path().join("flaky").exists());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let snapshot = PresenceSnapshot::new("Ada");
        store.publish(&id("ada"), &snapshot).await.unwrap();
        store.remove(&id("ada")).await.unwrap();
        store.remove(&id("ada")).await.unwrap();
        assert!(!dir.path().join("ada").exists());
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("never-created"));
        assert!(store.list_live().await.unwrap().is_empty());
    }

    #[test]
    fn colors_are_deterministic_and_in_palette() {
        assert_eq!(color_for("ada"), color_for("ada"));
        assert!(PALETTE.contains(&color_for("ada")));
        assert!(PALETTE.contains(&color_for("")));
    }
}
