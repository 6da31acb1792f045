use std::path::PathBuf;

use thiserror::Error;

/// Fabric failures. Contention and connectivity are kept apart: a lock
/// timeout is transient and worth retrying, an I/O error means the share
/// itself is degraded.
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("fabric I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out acquiring lock for {} after {attempts} attempts", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FabricError {
    fn from(err: serde_json::Error) -> Self {
        FabricError::Serialization(err.to_string())
    }
}

impl FabricError {
    /// True for faults that a later retry can reasonably clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, FabricError::LockTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_is_transient_io_is_not() {
        let timeout = FabricError::LockTimeout {
            path: PathBuf::from("/tmp/x.jsonl"),
            attempts: 20,
        };
        assert!(timeout.is_transient());

        let io = FabricError::Io(std::io::Error::new(std::io::ErrorKind::Other, "share gone"));
        assert!(!io.is_transient());
    }
}
