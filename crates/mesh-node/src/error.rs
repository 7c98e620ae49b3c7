use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("io error at {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("node id file {0:?} is corrupt: {1}")]
    CorruptNodeId(PathBuf, String),

    #[error("another instance is already running (pid {1}) for workspace {0:?}")]
    AlreadyRunning(PathBuf, i32),

    #[error("lock file {0:?} does not contain a valid pid: {1}")]
    CorruptLockFile(PathBuf, String),
}
