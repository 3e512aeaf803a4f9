//! Error types for the mirror engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for mirror engine operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring or restoring a directory tree.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Source root does not exist.
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Source root exists but is not a directory.
    #[error("source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    /// Target root already has entries in it.
    #[error("target directory must be empty: {}", .0.display())]
    TargetNotEmpty(PathBuf),

    /// Target root is the source root or lives below it.
    #[error("target {} can not be inside source {}", target.display(), source_root.display())]
    TargetInsideSource {
        source_root: PathBuf,
        target: PathBuf,
    },

    /// Source root is the target root or lives below it.
    #[error("source {} can not be inside target {}", source_root.display(), target.display())]
    SourceInsideTarget {
        source_root: PathBuf,
        target: PathBuf,
    },

    /// Restore was asked to read from something that is not a directory.
    #[error("target is not a directory: {}", .0.display())]
    TargetNotDirectory(PathBuf),

    /// Watch limit exceeded.
    #[error("watch limit exceeded: too many directories")]
    WatchLimitExceeded,

    /// The notification facility refused to watch a directory.
    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The notification stream itself failed.
    #[error("notification facility error: {0}")]
    Facility(#[source] std::io::Error),

    /// The session thread went away before reporting back.
    #[error("mirror session terminated unexpectedly")]
    SessionTerminated,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Whether this error must tear the whole session down instead of
    /// skipping the record that produced it.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::WatchLimitExceeded
                | Self::Watch { .. }
                | Self::Facility(_)
                | Self::SessionTerminated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_fatal_classification() {
        assert!(MirrorError::WatchLimitExceeded.is_session_fatal());
        assert!(
            MirrorError::Watch {
                path: PathBuf::from("/src/a"),
                source: io::Error::from_raw_os_error(libc::EACCES),
            }
            .is_session_fatal()
        );
        assert!(!MirrorError::Io(io::Error::from(io::ErrorKind::NotFound)).is_session_fatal());
    }

    #[test]
    fn test_nested_target_message() {
        let err = MirrorError::TargetInsideSource {
            source_root: PathBuf::from("/s"),
            target: PathBuf::from("/s/t"),
        };
        assert_eq!(err.to_string(), "target /s/t can not be inside source /s");
    }
}
