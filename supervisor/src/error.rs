//! Error types for the backup supervisor.

use std::path::PathBuf;

use dirmirror_engine::MirrorError;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors that can occur while managing backups.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Mirror engine error.
    #[error(transparent)]
    Engine(#[from] MirrorError),

    /// Another active session already writes into this target.
    #[error("target is already in use by an active backup: {}", .0.display())]
    TargetAlreadyActive(PathBuf),

    /// The same target was named more than once in one request.
    #[error("target named more than once: {}", .0.display())]
    DuplicateTarget(PathBuf),

    /// No active backup matches the pair.
    #[error("no active backup for {} -> {}", source_root.display(), target.display())]
    NoSuchSession { source_root: PathBuf, target: PathBuf },

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
