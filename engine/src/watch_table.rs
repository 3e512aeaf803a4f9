//! Association between watch handles and the directories they observe.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};

/// Opaque identifier the kernel hands out for one watched directory.
///
/// Unique while the watch is live. The kernel may hand the same value out
/// again once the watch has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    /// Wrap a raw watch descriptor.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw watch descriptor.
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd{}", self.0)
    }
}

/// Watch handle to absolute path lookup for one session.
#[derive(Debug)]
pub struct WatchTable {
    entries: HashMap<WatchHandle, PathBuf>,
    capacity: usize,
}

impl WatchTable {
    /// Create an empty table that refuses to grow past `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Record the path watched by `handle`.
    ///
    /// Re-adding a live handle replaces its path; the kernel returns the
    /// existing handle when a directory is watched again after a move.
    pub fn add(&mut self, handle: WatchHandle, path: impl Into<PathBuf>) -> Result<()> {
        if !self.entries.contains_key(&handle) && self.entries.len() >= self.capacity {
            return Err(MirrorError::WatchLimitExceeded);
        }
        self.entries.insert(handle, path.into());
        Ok(())
    }

    /// Path watched by `handle`, if the handle is still tracked.
    pub fn find(&self, handle: WatchHandle) -> Option<&Path> {
        self.entries.get(&handle).map(PathBuf::as_path)
    }

    /// Drop the entry for `handle`, returning its path.
    pub fn remove(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        self.entries.remove(&handle)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no directory is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose path is `dir` or lies below it.
    pub fn entries_under(&self, dir: &Path) -> Vec<(WatchHandle, PathBuf)> {
        self.entries
            .iter()
            .filter(|(_, path)| path.starts_with(dir))
            .map(|(handle, path)| (*handle, path.clone()))
            .collect()
    }
}
