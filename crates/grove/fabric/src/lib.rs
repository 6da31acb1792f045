//! File-level machinery every Grove store rides on.
//!
//! A shared network filesystem is the only coordination medium, so this
//! crate provides:
//! - **Locking**: sidecar lock files created with exclusive-create, with
//!   stale reclamation, behind a trait so the primitive can be swapped.
//! - **Appending**: one locked, fsynced, newline-terminated line at a time,
//!   plus atomic whole-file replacement via temp file and rename.
//! - **Reading**: lock-free cursor readers that only ever surface complete
//!   lines, tolerate truncation and read history backwards cheaply.
//! - **Tailing**: a cancellable polling follower with an adaptive interval.
//!
//! Readers never block writers and vice versa; the per-file append order is
//! the only order anything here guarantees.

pub mod appender;
pub mod error;
pub mod lock;
pub mod reader;
pub mod tailer;

pub use appender::{replace_file, LockedAppender};
pub use error::FabricError;
pub use lock::{acquire, LocalLocks, LockConfig, LockGuard, LockManager, SidecarLocks};
pub use reader::{LogCursor, LogReader};
pub use tailer::{LogTailer, TailerConfig};
