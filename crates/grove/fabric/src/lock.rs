//! Cross-process locking over a shared filesystem.
//!
//! Exclusive file creation is the one primitive a network share gives every
//! client, so the default manager serializes writers through sidecar
//! `<target>.lock` files. Lock files left behind by dead processes are
//! reclaimed once they age past a threshold; reclamation just deletes the
//! file and rejoins the create race, which admits exactly one winner.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use grove_types::stamp::epoch_seconds;
use grove_types::ClientId;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::FabricError;

/// Retry and staleness policy for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Overall bound on one acquisition.
    pub timeout: Duration,
    /// Attempt budget within the timeout.
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Ceiling on a single backoff delay.
    pub backoff_max: Duration,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter_max: Duration,
    /// Age past which a lock file is presumed abandoned and reclaimed.
    pub stale_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            max_attempts: 20,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_millis(500),
            jitter_max: Duration::from_millis(30),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// A held lock. Dropping the guard releases it.
pub trait LockGuard: Send + std::fmt::Debug {}

/// One non-blocking acquisition attempt. The retry policy lives in
/// [`acquire`] so every backend shares it.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn try_acquire(&self, target: &Path) -> Result<Option<Box<dyn LockGuard>>, FabricError>;
}

/// Acquires `target` under the bounded retry policy: exponential backoff
/// with jitter between attempts, [`FabricError::LockTimeout`] once the
/// attempt budget or the overall timeout runs out.
pub async fn acquire(
    manager: &dyn LockManager,
    target: &Path,
    config: &LockConfig,
) -> Result<Box<dyn LockGuard>, FabricError> {
    let started = tokio::time::Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        if let Some(guard) = manager.try_acquire(target).await? {
            return Ok(guard);
        }
        if attempts >= config.max_attempts.max(1) || started.elapsed() >= config.timeout {
            break;
        }
        tokio::time::sleep(backoff_delay(config, attempts - 1)).await;
    }
    warn!(
        path = %target.display(),
        attempts,
        "Lock acquisition timed out"
    );
    Err(FabricError::LockTimeout {
        path: target.to_path_buf(),
        attempts,
    })
}

fn backoff_delay(config: &LockConfig, attempt: u32) -> Duration {
    let exponent = attempt.min(5);
    let scaled = config.backoff_base.as_secs_f64() * f64::from(1u32 << exponent);
    let capped = scaled.min(config.backoff_max.as_secs_f64());
    let jitter = if config.jitter_max.is_zero() {
        0.0
    } else {
        rand::thread_rng().gen_range(0.0..config.jitter_max.as_secs_f64())
    };
    Duration::from_secs_f64(capped + jitter)
}

#[derive(Serialize)]
struct LockOwner<'a> {
    pid: u32,
    client_id: &'a str,
    acquired_at: f64,
}

/// Cross-process manager backed by sidecar `<target>.lock` files.
///
/// The lock file carries owner metadata so an operator can see who wedged a
/// room. Creation uses `create_new`, the atomic exclusive-create every
/// filesystem supports.
pub struct SidecarLocks {
    client_id: ClientId,
    stale_after: Duration,
}

impl SidecarLocks {
    pub fn new(client_id: ClientId, stale_after: Duration) -> Self {
        Self {
            client_id,
            stale_after,
        }
    }

    fn lock_path(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        target.with_file_name(name)
    }

    fn write_owner(&self, file: &mut fs::File) -> Result<(), FabricError> {
        let owner = LockOwner {
            pid: std::process::id(),
            client_id: self.client_id.as_str(),
            acquired_at: epoch_seconds(),
        };
        let payload = serde_json::to_vec(&owner)?;
        file.write_all(&payload)?;
        file.flush()?;
        Ok(())
    }

    /// Deletes the lock file when it has aged past the threshold. The next
    /// attempt races to recreate it; losing that race is just another
    /// contended attempt.
    fn reclaim_if_stale(&self, lock_path: &Path) -> Result<(), FabricError> {
        let modified = match fs::metadata(lock_path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            // Released between our attempt and the stat.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age < self.stale_after {
            return Ok(());
        }
        warn!(
            path = %lock_path.display(),
            age_secs = age.as_secs(),
            "Reclaiming stale lock file"
        );
        match fs::remove_file(lock_path) {
            Ok(()) => Ok(()),
            // A peer reclaimed it first.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl LockManager for SidecarLocks {
    async fn try_acquire(&self, target: &Path) -> Result<Option<Box<dyn LockGuard>>, FabricError> {
        let lock_path = Self::lock_path(target);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                if let Err(err) = self.write_owner(&mut file) {
                    let _ = fs::remove_file(&lock_path);
                    return Err(err);
                }
                debug!(path = %lock_path.display(), "Acquired lock");
                Ok(Some(Box::new(SidecarGuard { lock_path })))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                self.reclaim_if_stale(&lock_path)?;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug)]
struct SidecarGuard {
    lock_path: PathBuf,
}

impl LockGuard for SidecarGuard {}

impl Drop for SidecarGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.lock_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    path = %self.lock_path.display(),
                    error = %err,
                    "Failed to release lock file"
                );
            }
        }
    }
}

/// In-process manager for tests and single-process deployments: one tokio
/// mutex per path.
#[derive(Default)]
pub struct LocalLocks {
    slots: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockManager for LocalLocks {
    async fn try_acquire(&self, target: &Path) -> Result<Option<Box<dyn LockGuard>>, FabricError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(target.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        match slot.try_lock_owned() {
            Ok(guard) => Ok(Some(Box::new(LocalGuard { _slot: guard }))),
            Err(_) => Ok(None),
        }
    }
}

#[derive(Debug)]
struct LocalGuard {
    _slot: tokio::sync::OwnedMutexGuard<()>,
}

impl LockGuard for LocalGuard {}
