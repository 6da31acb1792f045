//! Serialized appends and atomic whole-file replacement.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::FabricError;
use crate::lock::{acquire, LockConfig, LockManager, SidecarLocks};

/// Writer side of the fabric.
///
/// Every mutation of an append-only log is one locked, flushed and fsynced
/// newline-terminated line, so concurrent readers either see a complete row
/// or nothing of it.
#[derive(Clone)]
pub struct LockedAppender {
    locks: Arc<dyn LockManager>,
    config: LockConfig,
}

impl LockedAppender {
    pub fn new(locks: Arc<dyn LockManager>, config: LockConfig) -> Self {
        Self { locks, config }
    }

    /// Cross-process appender backed by sidecar lock files.
    pub fn sidecar(client_id: grove_types::ClientId, config: LockConfig) -> Self {
        let locks = Arc::new(SidecarLocks::new(client_id, config.stale_after));
        Self::new(locks, config)
    }

    pub fn lock_config(&self) -> &LockConfig {
        &self.config
    }

    /// Appends `line` (trailing newlines stripped, one added back) under the
    /// file's lock, then fsyncs before releasing.
    pub async fn append_line(&self, path: &Path, line: &str) -> Result<(), FabricError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let _guard = acquire(self.locks.as_ref(), path, &self.config).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        file.sync_all()?;
        debug!(path = %path.display(), bytes = line.len() + 1, "Appended record line");
        Ok(())
    }

    /// Serializes `record` to one JSON line and appends it.
    pub async fn append_json<T: Serialize>(
        &self,
        path: &Path,
        record: &T,
    ) -> Result<(), FabricError> {
        let line = serde_json::to_string(record)?;
        self.append_line(path, &line).await
    }
}

/// Atomically replaces the contents of `path` with `bytes`.
///
/// The new contents are written to a hidden temp file in the same directory,
/// fsynced and renamed over the target, so readers observe either the old
/// document or the new one in full. No lock is needed; the rename is the
/// atomicity mechanism.
pub fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), FabricError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    let outcome = write_then_rename(&tmp, path, bytes);
    if outcome.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    outcome
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<(), FabricError> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, path)?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let nonce = Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(
        ".{name}.tmp-{}-{}",
        std::process::id(),
        &nonce[..8]
    ))
}
