//! Periodic presence publication.
//!
//! One spawned task keeps this client's presence file fresh: every beat
//! stamps the current epoch seconds and replaces the file atomically.
//! Switching rooms removes the file left behind in the previous room, and a
//! clean shutdown removes the file entirely so peers see the departure
//! without waiting out the freshness window. Publishing into the local AI
//! room is skipped; it has no roster.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use grove_presence::{color_for, PresenceConfig, PresenceStore};
use grove_types::stamp::epoch_seconds;
use grove_types::{ClientId, PresenceId, PresenceSnapshot, RoomName};

use crate::paths::{is_local_room, SharedTree};

/// What the heartbeat publishes. Updates land on the next beat, which is
/// immediate: a profile change wakes the task.
#[derive(Debug, Clone)]
pub struct HeartbeatProfile {
    pub room: RoomName,
    pub name: String,
    pub status: String,
    /// Roster color; unset means derive one from the name.
    pub color: Option<String>,
}

impl HeartbeatProfile {
    pub fn new(room: RoomName, name: impl Into<String>) -> Self {
        Self {
            room,
            name: name.into(),
            status: String::new(),
            color: None,
        }
    }
}

/// Control surface of a running heartbeat. Dropping it stops the task and
/// removes the presence file.
pub struct HeartbeatHandle {
    profile: watch::Sender<HeartbeatProfile>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Moves the heartbeat to another room. The next beat publishes there
    /// and removes the file left in the previous room.
    pub fn switch_room(&self, room: RoomName) {
        self.profile.send_modify(|profile| profile.room = room);
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.profile
            .send_modify(|profile| profile.status = status.into());
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.profile
            .send_modify(|profile| profile.name = name.into());
    }

    /// Stops the heartbeat and waits for its cleanup to finish.
    pub async fn stopped(self) {
        let HeartbeatHandle { profile, task } = self;
        drop(profile);
        if let Err(err) = task.await {
            warn!(error = %err, "Heartbeat task failed");
        }
    }
}

/// Spawns the heartbeat task for `identity`.
pub fn spawn_heartbeat(
    tree: SharedTree,
    identity: PresenceId,
    client_id: ClientId,
    initial: HeartbeatProfile,
    presence: PresenceConfig,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> HeartbeatHandle {
    let (profile_tx, mut profile_rx) = watch::channel(initial);
    let task = tokio::spawn(async move {
        let mut current_room: Option<RoomName> = None;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let profile = profile_rx.borrow().clone();
            if current_room.as_ref() != Some(&profile.room) {
                if let Some(previous) = current_room.take() {
                    remove_presence(&tree, &previous, &identity, &presence).await;
                }
                current_room = Some(profile.room.clone());
            }
            if !is_local_room(&profile.room) {
                publish_beat(&tree, &identity, &client_id, &profile, &presence).await;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = profile_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        if let Some(room) = current_room {
            remove_presence(&tree, &room, &identity, &presence).await;
        }
        debug!(identity = %identity, "Heartbeat stopped");
    });
    HeartbeatHandle {
        profile: profile_tx,
        task,
    }
}

async fn publish_beat(
    tree: &SharedTree,
    identity: &PresenceId,
    client_id: &ClientId,
    profile: &HeartbeatProfile,
    presence: &PresenceConfig,
) {
    let store = PresenceStore::new(
        tree.presence_dir(&profile.room),
        profile.room.clone(),
        presence.clone(),
    );
    let mut snapshot = PresenceSnapshot::new(profile.name.clone());
    snapshot.color = profile
        .color
        .clone()
        .unwrap_or_else(|| color_for(&profile.name).to_string());
    snapshot.status = profile.status.clone();
    snapshot.room = Some(profile.room.as_str().to_string());
    snapshot.last_seen = Some(epoch_seconds());
    snapshot.client_id = Some(client_id.to_string());
    // A failed beat is degraded connectivity, not a reason to stop; the
    // next beat retries.
    if let Err(err) = store.publish(identity, &snapshot).await {
        warn!(room = %profile.room, error = %err, "Heartbeat publish failed");
    }
}

async fn remove_presence(
    tree: &SharedTree,
    room: &RoomName,
    identity: &PresenceId,
    presence: &PresenceConfig,
) {
    if is_local_room(room) {
        return;
    }
    let store = PresenceStore::new(tree.presence_dir(room), room.clone(), presence.clone());
    if let Err(err) = store.remove(identity).await {
        warn!(room = %room, error = %err, "Failed to remove presence file");
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use grove_types::codec;

    use super::*;

    fn room(raw: &str) -> RoomName {
        RoomName::parse(raw).unwrap()
    }

    fn identity(raw: &str) -> PresenceId {
        PresenceId::parse(raw).unwrap()
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..150 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn spawn(
        tree: &SharedTree,
        who: &str,
        starting_room: &str,
        shutdown: watch::Receiver<bool>,
    ) -> HeartbeatHandle {
        spawn_heartbeat(
            tree.clone(),
            identity(who),
            ClientId::generate(),
            HeartbeatProfile::new(room(starting_room), who),
            PresenceConfig::default(),
            Duration::from_millis(30),
            shutdown,
        )
    }

    fn presence_file(tree: &SharedTree, room_name: &str, who: &str) -> std::path::PathBuf {
        tree.presence_dir(&room(room_name)).join(who)
    }

    fn exists(path: &Path) -> bool {
        path.exists()
    }

    #[tokio::test]
    async fn beats_publish_a_live_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SharedTree::new(dir.path());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn(&tree, "ada", "general", shutdown_rx);
        let file = presence_file(&tree, "general", "ada");
        wait_until("first beat", || exists(&file)).await;

        let snapshot = codec::decode_presence(&std::fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(snapshot.name, "ada");
        assert_eq!(snapshot.room.as_deref(), Some("general"));
        assert!(snapshot.last_seen.is_some());
        assert!(snapshot.client_id.is_some());
        assert_eq!(snapshot.color, color_for("ada"));

        shutdown_tx.send(true).unwrap();
        handle.stopped().await;
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn switching_rooms_moves_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SharedTree::new(dir.path());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn(&tree, "ada", "general", shutdown_rx);
        let old = presence_file(&tree, "general", "ada");
        wait_until("first beat", || exists(&old)).await;

        handle.switch_room(room("build-logs"));
        let new = presence_file(&tree, "build-logs", "ada");
        wait_until("room switch", || !exists(&old) && exists(&new)).await;

        shutdown_tx.send(true).unwrap();
        handle.stopped().await;
        assert!(!new.exists());
    }

    #[tokio::test]
    async fn local_room_is_never_published() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SharedTree::new(dir.path());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn(&tree, "ada", "ai-dm", shutdown_rx);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!tree.rooms_dir().join("ai-dm").exists());

        // Leaving the local room starts publishing normally.
        handle.switch_room(room("general"));
        let file = presence_file(&tree, "general", "ada");
        wait_until("beat after leaving local room", || exists(&file)).await;

        shutdown_tx.send(true).unwrap();
        handle.stopped().await;
    }

    #[tokio::test]
    async fn status_updates_land_without_waiting_a_full_beat() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SharedTree::new(dir.path());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_heartbeat(
            tree.clone(),
            identity("ada"),
            ClientId::generate(),
            HeartbeatProfile::new(room("general"), "ada"),
            PresenceConfig::default(),
            // Long interval: only the change wake can explain a prompt update.
            Duration::from_secs(60),
            shutdown_rx,
        );
        let file = presence_file(&tree, "general", "ada");
        wait_until("first beat", || exists(&file)).await;

        handle.set_status("reviewing");
        wait_until("status update", || {
            std::fs::read_to_string(&file)
                .ok()
                .and_then(|raw| codec::decode_presence(&raw))
                .is_some_and(|snapshot| snapshot.status == "reviewing")
        })
        .await;

        shutdown_tx.send(true).unwrap();
        handle.stopped().await;
    }

    #[tokio::test]
    async fn dropping_the_handle_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SharedTree::new(dir.path());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn(&tree, "ada", "general", shutdown_rx);
        let file = presence_file(&tree, "general", "ada");
        wait_until("first beat", || exists(&file)).await;

        drop(handle);
        wait_until("cleanup after drop", || !exists(&file)).await;
    }
}
