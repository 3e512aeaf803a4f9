//! Path translation between a source tree and its mirror.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maps paths under one root onto the same relative location under another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    source_root: PathBuf,
    target_root: PathBuf,
}

impl PathMapper {
    pub fn new(source_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    /// Location under the target root mirroring `path`. `None` when `path`
    /// is not the source root or below it.
    pub fn to_target(&self, path: &Path) -> Option<PathBuf> {
        rebase(path, &self.source_root, &self.target_root)
    }

    /// Location under the source root that `path` in the target mirrors.
    pub fn to_source(&self, path: &Path) -> Option<PathBuf> {
        rebase(path, &self.target_root, &self.source_root)
    }

    /// The same mapper with the two roots swapped.
    pub fn reversed(&self) -> Self {
        Self::new(self.target_root.clone(), self.source_root.clone())
    }
}

/// Replace the `from` prefix of `path` with `to`.
pub(crate) fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(from).ok()?;
    if rest.as_os_str().is_empty() {
        Some(to.to_path_buf())
    } else {
        Some(to.join(rest))
    }
}

/// Canonical form of `path`, allowing its trailing components not to exist
/// yet. The existing prefix is resolved through symlinks, the rest is
/// appended as written.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while fs::symlink_metadata(existing).is_err() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            break;
        };
        missing.push(name);
        existing = parent;
    }

    let mut resolved = fs::canonicalize(existing)?;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
