//! Typed access to one room's event log.
//!
//! A [`RoomLog`] is the codec-aware layer over the fabric: appends encode
//! through the record codec, reads decode and skip what the codec rejects.
//! Handles for the same room share a wake signal, so a local append is
//! visible to local monitors without waiting out a poll interval.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use grove_fabric::{
    FabricError, LockedAppender, LogCursor, LogReader, LogTailer, TailerConfig,
};
use grove_types::{codec, Event, MAX_MESSAGES};

/// One room's append-only event log.
#[derive(Clone)]
pub struct RoomLog {
    path: PathBuf,
    appender: LockedAppender,
    wake: Arc<Notify>,
    tailer: TailerConfig,
}

impl RoomLog {
    pub fn new(
        path: impl Into<PathBuf>,
        appender: LockedAppender,
        wake: Arc<Notify>,
        tailer: TailerConfig,
    ) -> Self {
        Self {
            path: path.into(),
            appender,
            wake,
            tailer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encodes and appends one event under the log's lock, then nudges
    /// local monitors so the author sees their own row immediately.
    pub async fn append(&self, event: &Event) -> Result<(), FabricError> {
        let line = codec::encode_event(event)?;
        self.appender.append_line(&self.path, &line).await?;
        self.wake.notify_waiters();
        Ok(())
    }

    /// Recent history: decodes the tail of the log and keeps the newest
    /// [`MAX_MESSAGES`] events. Twice that many raw lines are scanned so
    /// undecodable rows do not eat into the budget.
    pub fn load_recent(&self) -> Result<Vec<Event>, FabricError> {
        let reader = LogReader::open(&self.path);
        let mut events: Vec<Event> = reader
            .tail(MAX_MESSAGES * 2)?
            .iter()
            .filter_map(|line| codec::decode_event(line))
            .collect();
        let skip = events.len().saturating_sub(MAX_MESSAGES);
        Ok(events.split_off(skip))
    }

    /// Cursor at the current end of the log, for monitors that only want
    /// rows from now on.
    pub fn end_cursor(&self) -> Result<LogCursor, FabricError> {
        LogReader::open(&self.path).end_cursor()
    }

    /// Follows the log from `from`, delivering decoded batches until the
    /// shutdown signal flips.
    pub fn monitor(&self, from: LogCursor, shutdown: watch::Receiver<bool>) -> RoomMonitor {
        let tailer = LogTailer::new(LogReader::open(&self.path), self.tailer.clone());
        let (lines, task) = tailer.spawn(from, shutdown, self.wake.clone());
        RoomMonitor { lines, task }
    }
}

/// Receiving side of a room monitor.
pub struct RoomMonitor {
    lines: mpsc::Receiver<Vec<String>>,
    task: JoinHandle<LogCursor>,
}

impl RoomMonitor {
    /// Next batch of events, in file order. Rows the codec rejects are
    /// dropped; a batch left empty by that is skipped entirely, so the
    /// returned vector is never empty. `None` once the monitor stopped.
    pub async fn next_batch(&mut self) -> Option<Vec<Event>> {
        loop {
            let lines = self.lines.recv().await?;
            let events: Vec<Event> = lines
                .iter()
                .filter_map(|line| codec::decode_event(line))
                .collect();
            if !events.is_empty() {
                return Some(events);
            }
        }
    }

    /// Waits for the polling task and returns its final cursor, which the
    /// caller can persist and resume from. Call after the shutdown signal
    /// has flipped; on a quiet log that signal is what stops the task.
    pub async fn finish(self) -> LogCursor {
        drop(self.lines);
        match self.task.await {
            Ok(cursor) => cursor,
            Err(err) => {
                warn!(error = %err, "Room monitor task failed, cursor lost");
                LogCursor::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use grove_fabric::LockConfig;
    use grove_types::{ClientId, EventKind};

    use super::*;

    fn fast_tailer() -> TailerConfig {
        TailerConfig {
            min_interval: Duration::from_millis(10),
            active_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(50),
            ..TailerConfig::default()
        }
    }

    fn room_log(path: &Path) -> RoomLog {
        RoomLog::new(
            path,
            LockedAppender::sidecar(ClientId::generate(), LockConfig::default()),
            Arc::new(Notify::new()),
            fast_tailer(),
        )
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(bytes).unwrap();
    }

    #[tokio::test]
    async fn append_then_load_recent_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms/general/messages.jsonl");
        let log = room_log(&path);

        log.append(&Event::new(EventKind::Chat, "ada", "first"))
            .await
            .unwrap();
        log.append(&Event::new(EventKind::Me, "bob", "waves"))
            .await
            .unwrap();

        let events = log.load_recent().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "first");
        assert_eq!(events[1].kind, EventKind::Me);
    }

    #[test]
    fn load_recent_caps_history_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");

        let mut contents = String::new();
        for i in 0..250 {
            contents.push_str(&format!(
                "{{\"v\":1,\"ts\":\"2026-08-22T10:00:00\",\"type\":\"chat\",\"author\":\"a\",\"text\":\"n{i}\"}}\n"
            ));
            if i % 25 == 0 {
                contents.push_str("{ broken row\n");
            }
        }
        append_raw(&path, contents.as_bytes());

        let log = room_log(&path);
        let events = log.load_recent().unwrap();
        assert_eq!(events.len(), MAX_MESSAGES);
        assert_eq!(events.first().unwrap().text, "n50");
        assert_eq!(events.last().unwrap().text, "n249");
    }

    #[test]
    fn load_recent_of_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = room_log(&dir.path().join("absent.jsonl"));
        assert!(log.load_recent().unwrap().is_empty());
    }

    #[tokio::test]
    async fn monitor_delivers_decoded_events_and_final_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let log = room_log(&path);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut monitor = log.monitor(LogCursor::default(), shutdown_rx);

        append_raw(&path, b"{ not an event\n");
        log.append(&Event::new(EventKind::Chat, "ada", "hello"))
            .await
            .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), monitor.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].text, "hello");

        shutdown_tx.send(true).unwrap();
        let cursor = tokio::time::timeout(Duration::from_secs(2), monitor.finish())
            .await
            .unwrap();
        assert_eq!(cursor.position, std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn monitor_from_end_cursor_sees_only_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let log = room_log(&path);

        log.append(&Event::new(EventKind::Chat, "ada", "old"))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut monitor = log.monitor(log.end_cursor().unwrap(), shutdown_rx);

        log.append(&Event::new(EventKind::Chat, "ada", "new"))
            .await
            .unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(2), monitor.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].text, "new");

        shutdown_tx.send(true).unwrap();
        monitor.finish().await;
    }
}
