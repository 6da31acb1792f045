//! Grove runtime: one client's connection to a deployment.
//!
//! A deployment is nothing but files on a shared mount; there is no server.
//! This crate supplies the layer a complete client sits on:
//! - **Trees**: the shared, network-authoritative layout and the per-client
//!   local layout, including the routing of the private AI room.
//! - **Room logs**: codec-aware append, recent-history load and cancellable
//!   monitoring over the fabric tailer.
//! - **Heartbeat**: the presence republication task.
//! - **Session config**: the durable settings snapshot.
//! - **[`Grove`]**: the facade wiring one lock manager and one shutdown
//!   signal through all of it.

#![deny(unsafe_code)]

pub mod heartbeat;
pub mod paths;
pub mod rooms;
pub mod session;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::info;

use grove_fabric::LockedAppender;
use grove_types::{ClientId, MemoryScope, NameError, PresenceId, RoomName};

pub use grove_fabric::{FabricError, LockConfig, LogCursor, TailerConfig};
pub use grove_ledger::{ActionLedger, LedgerError, NewAction};
pub use grove_memory::{MemoryConfig, MemoryError, MemoryStore, NewMemory};
pub use grove_presence::{PresenceConfig, PresenceError, PresenceStore};
pub use heartbeat::{spawn_heartbeat, HeartbeatHandle, HeartbeatProfile};
pub use paths::{is_local_room, LocalTree, SharedTree, DEFAULT_LOCAL_DIR};
pub use rooms::{RoomLog, RoomMonitor};
pub use session::SessionConfig;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a Grove instance needs to join a deployment.
#[derive(Debug, Clone)]
pub struct GroveConfig {
    /// Network-mounted root every participant shares.
    pub shared_root: PathBuf,
    /// Per-client root for private state.
    pub local_root: PathBuf,
    /// Identity used for the presence file; already validated as a safe
    /// path component.
    pub identity: PresenceId,
    pub lock: LockConfig,
    pub presence: PresenceConfig,
    pub memory: MemoryConfig,
    pub tailer: TailerConfig,
    /// Cadence of presence republication.
    pub heartbeat_interval: Duration,
}

impl GroveConfig {
    pub fn new(
        shared_root: impl Into<PathBuf>,
        local_root: impl Into<PathBuf>,
        identity: PresenceId,
    ) -> Self {
        Self {
            shared_root: shared_root.into(),
            local_root: local_root.into(),
            identity,
            lock: LockConfig::default(),
            presence: PresenceConfig::default(),
            memory: MemoryConfig::default(),
            tailer: TailerConfig::default(),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// One client's handle on a deployment.
///
/// All stores hand out clones of one locked appender, so every mutation in
/// this process goes through the same lock manager, and all monitors and
/// the heartbeat observe one runtime-wide shutdown signal. Room handles for
/// the same room share a wake signal connecting local appends to local
/// monitors.
pub struct Grove {
    shared: SharedTree,
    local: LocalTree,
    client_id: ClientId,
    appender: LockedAppender,
    config: GroveConfig,
    wakes: Mutex<HashMap<RoomName, Arc<Notify>>>,
    shutdown: watch::Sender<bool>,
}

impl Grove {
    /// Connects to a deployment, creating both trees as needed. The default
    /// room exists from the first join onward.
    pub fn init(config: GroveConfig) -> Result<Self, RuntimeError> {
        let shared = SharedTree::new(&config.shared_root);
        let local = LocalTree::new(&config.local_root);
        std::fs::create_dir_all(shared.room_dir(&RoomName::default()))?;
        std::fs::create_dir_all(local.root())?;

        let client_id = ClientId::generate();
        let appender = LockedAppender::sidecar(client_id.clone(), config.lock.clone());
        let (shutdown, _) = watch::channel(false);
        info!(
            shared = %shared.root().display(),
            local = %local.root().display(),
            client_id = %client_id,
            identity = %config.identity,
            "Grove initialized"
        );
        Ok(Self {
            shared,
            local,
            client_id,
            appender,
            config,
            wakes: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    pub fn shared(&self) -> &SharedTree {
        &self.shared
    }

    pub fn local(&self) -> &LocalTree {
        &self.local
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn identity(&self) -> &PresenceId {
        &self.config.identity
    }

    /// Rooms visible in the shared tree.
    pub fn list_rooms(&self) -> Result<Vec<RoomName>, RuntimeError> {
        Ok(self.shared.list_rooms()?)
    }

    /// Typed handle on a room's event log. The private AI room routes to
    /// the local tree.
    pub fn room_log(&self, room: &RoomName) -> RoomLog {
        let path = paths::room_log_path(&self.shared, &self.local, room);
        RoomLog::new(
            path,
            self.appender.clone(),
            self.wake_for(room),
            self.config.tailer.clone(),
        )
    }

    /// Presence store over a room's roster. The local room's store points
    /// at a directory nothing publishes into, so it always lists empty.
    pub fn presence(&self, room: &RoomName) -> PresenceStore {
        let dir = if is_local_room(room) {
            self.local.ai_dm_dir().join("presence")
        } else {
            self.shared.presence_dir(room)
        };
        PresenceStore::new(dir, room.clone(), self.config.presence.clone())
    }

    /// Memory store across all three scopes: private and repo in the local
    /// tree, global on the share.
    pub fn memory(&self) -> MemoryStore {
        let mut scope_paths = BTreeMap::new();
        scope_paths.insert(MemoryScope::Private, self.local.private_memory());
        scope_paths.insert(MemoryScope::Repo, self.local.repo_memory());
        scope_paths.insert(MemoryScope::Global, self.shared.global_memory());
        MemoryStore::new(scope_paths, self.appender.clone(), self.config.memory.clone())
    }

    /// Action ledger over the local audit log.
    pub fn actions(&self) -> ActionLedger {
        ActionLedger::new(self.local.action_log(), self.appender.clone())
    }

    /// Loads the session settings snapshot from the local tree.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::load(&self.local.config_file())
    }

    /// Persists the session settings snapshot atomically.
    pub fn save_session_config(&self, config: &SessionConfig) -> Result<(), RuntimeError> {
        config.save(&self.local.config_file())?;
        Ok(())
    }

    /// Receiver of the runtime-wide shutdown signal, for monitors.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Starts the presence heartbeat for this instance's identity.
    pub fn spawn_heartbeat(&self, profile: HeartbeatProfile) -> HeartbeatHandle {
        heartbeat::spawn_heartbeat(
            self.shared.clone(),
            self.config.identity.clone(),
            self.client_id.clone(),
            profile,
            self.config.presence.clone(),
            self.config.heartbeat_interval,
            self.shutdown.subscribe(),
        )
    }

    /// Flips the shutdown signal. Monitors and the heartbeat stop promptly;
    /// anything subscribing afterwards sees it already flipped.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        info!("Grove shutting down");
    }

    fn wake_for(&self, room: &RoomName) -> Arc<Notify> {
        let mut wakes = match self.wakes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        wakes.entry(room.clone()).or_default().clone()
    }
}
