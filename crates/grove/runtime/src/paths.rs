//! On-disk layout of a deployment.
//!
//! Two trees carry everything. The shared tree is the network-mounted root
//! every participant sees; the local tree holds one client's private state.
//! Both are pure path arithmetic over parsed names, so nothing here can
//! escape its root.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use grove_types::{RoomName, AI_DM_ROOM};

/// Directory name of the local tree when the caller has no preference.
pub const DEFAULT_LOCAL_DIR: &str = ".grove";

/// Network-authoritative tree shared by every participant.
#[derive(Debug, Clone)]
pub struct SharedTree {
    root: PathBuf,
}

impl SharedTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rooms_dir(&self) -> PathBuf {
        self.root.join("rooms")
    }

    pub fn room_dir(&self, room: &RoomName) -> PathBuf {
        self.rooms_dir().join(room.as_str())
    }

    /// The room's append-only event log.
    pub fn room_log(&self, room: &RoomName) -> PathBuf {
        self.room_dir(room).join("messages.jsonl")
    }

    /// The room's presence directory, one file per identity.
    pub fn presence_dir(&self, room: &RoomName) -> PathBuf {
        self.room_dir(room).join("presence")
    }

    /// The deployment-wide memory log.
    pub fn global_memory(&self) -> PathBuf {
        self.root.join("memory").join("global.jsonl")
    }

    /// Rooms that exist on disk, sorted. Entries that are not directories or
    /// do not parse as room names are not rooms.
    pub fn list_rooms(&self) -> io::Result<Vec<RoomName>> {
        let entries = match fs::read_dir(self.rooms_dir()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut rooms = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(room) = RoomName::parse(name) {
                    rooms.push(room);
                }
            }
        }
        rooms.sort();
        Ok(rooms)
    }
}

/// Per-client tree for state that never crosses the share.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ai_dm_dir(&self) -> PathBuf {
        self.root.join("rooms").join(AI_DM_ROOM)
    }

    /// Event log of the private AI conversation. Same codec and lock
    /// discipline as a shared room, different tree.
    pub fn ai_dm_log(&self) -> PathBuf {
        self.ai_dm_dir().join("messages.jsonl")
    }

    pub fn private_memory(&self) -> PathBuf {
        self.root.join("memory").join("private.jsonl")
    }

    pub fn repo_memory(&self) -> PathBuf {
        self.root.join("memory").join("repo.jsonl")
    }

    /// Action ledger; doubles as the administrative audit trail.
    pub fn action_log(&self) -> PathBuf {
        self.root.join("actions").join("audit.jsonl")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }
}

/// True for the one room whose log lives in the local tree.
pub fn is_local_room(room: &RoomName) -> bool {
    room.as_str() == AI_DM_ROOM
}

/// Resolves a room's log file across the two trees.
pub fn room_log_path(shared: &SharedTree, local: &LocalTree, room: &RoomName) -> PathBuf {
    if is_local_room(room) {
        local.ai_dm_log()
    } else {
        shared.room_log(room)
    }
}
