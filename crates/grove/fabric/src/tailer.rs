//! Cancellable polling follower for one log file.
//!
//! There is no push channel on a network share, so following a log means
//! polling it. The interval adapts: fresh rows pin it to the minimum, quiet
//! stretches ramp it toward the maximum, and a local-write wake signal snaps
//! it back so a client sees its own rows immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::reader::{LogCursor, LogReader};

/// Poll cadence policy.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Interval right after activity.
    pub min_interval: Duration,
    /// Interval while recently active.
    pub active_interval: Duration,
    /// Ceiling reached during long quiet stretches.
    pub max_interval: Duration,
    /// Quiet cycles before the interval starts ramping up.
    pub idle_ramp_after: u32,
    /// Increment added per quiet cycle once ramping.
    pub ramp_step: Duration,
    /// Capacity of the delivery channel.
    pub channel_capacity: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(200),
            active_interval: Duration::from_millis(350),
            max_interval: Duration::from_millis(1500),
            idle_ramp_after: 4,
            ramp_step: Duration::from_millis(100),
            channel_capacity: 64,
        }
    }
}

/// Polls one log and delivers batches of complete lines.
pub struct LogTailer {
    reader: LogReader,
    config: TailerConfig,
}

impl LogTailer {
    pub fn new(reader: LogReader, config: TailerConfig) -> Self {
        Self { reader, config }
    }

    /// Spawns the polling loop.
    ///
    /// Non-empty batches arrive on the returned channel in file order. The
    /// loop ends promptly when `shutdown` flips to true (or its sender
    /// drops), or when the receiver is dropped; the final cursor comes back
    /// through the join handle so it can be persisted.
    pub fn spawn(
        self,
        mut cursor: LogCursor,
        mut shutdown: watch::Receiver<bool>,
        wake: Arc<Notify>,
    ) -> (mpsc::Receiver<Vec<String>>, JoinHandle<LogCursor>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = tokio::spawn(async move {
            let mut interval = self.config.active_interval;
            let mut idle_cycles: u32 = 0;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let batch = match self.reader.read_new(&mut cursor) {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!(
                            path = %self.reader.path().display(),
                            error = %err,
                            "Tail poll failed, retrying next cycle"
                        );
                        Vec::new()
                    }
                };
                if batch.is_empty() {
                    idle_cycles = idle_cycles.saturating_add(1).min(20);
                    interval = if idle_cycles >= self.config.idle_ramp_after {
                        (interval + self.config.ramp_step).min(self.config.max_interval)
                    } else {
                        self.config.active_interval
                    };
                } else {
                    idle_cycles = 0;
                    interval = self.config.min_interval;
                    if tx.send(batch).await.is_err() {
                        debug!("Tail receiver dropped, stopping");
                        break;
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wake.notified() => {
                        idle_cycles = 0;
                        interval = self.config.min_interval;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(path = %self.reader.path().display(), "Tailer stopped");
            cursor
        });
        (rx, handle)
    }
}
