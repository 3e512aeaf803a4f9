//! Recursive watch installation.

use std::io;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{MirrorError, Result};
use crate::watch_table::{WatchHandle, WatchTable};

/// Something that can place a directory watch.
pub trait WatchRegistrar {
    /// Watch one directory, without following a symlink at `path`.
    fn watch_directory(&self, path: &Path) -> io::Result<WatchHandle>;

    /// Drop a watch placed earlier.
    fn unwatch(&self, handle: WatchHandle) -> io::Result<()>;
}

/// Watch `root` and every directory below it, depth first.
///
/// A directory is watched before its listing is read, so anything created
/// inside it afterwards is reported. Symlinks are never followed. A
/// directory that vanishes mid-walk is skipped. Returns the handle of
/// `root`, or `None` if `root` itself vanished.
pub fn install(
    registrar: &impl WatchRegistrar,
    root: &Path,
    table: &mut WatchTable,
) -> Result<Option<WatchHandle>> {
    let mut root_handle = None;
    let mut walker = WalkDir::new(root).follow_links(false).into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                match err.io_error().map(io::Error::kind) {
                    Some(io::ErrorKind::NotFound) => {
                        debug!("Directory vanished during watch install: {err}")
                    }
                    _ => warn!("Skipping unreadable entry during watch install: {err}"),
                }
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        match registrar.watch_directory(path) {
            Ok(handle) => {
                table.add(handle, path)?;
                if entry.depth() == 0 {
                    root_handle = Some(handle);
                }
                debug!("Watching {} as {handle}", path.display());
            }
            Err(e) if is_vanished(&e) => {
                debug!("Directory vanished before watch: {}", path.display());
                walker.skip_current_dir();
            }
            Err(e) => return Err(watch_error(path, e)),
        }
    }

    Ok(root_handle)
}

/// Whether a watch request failed only because the directory is gone.
pub(crate) fn is_vanished(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENOTDIR)
}

/// Session error for a watch the facility refused.
pub(crate) fn watch_error(path: &Path, e: io::Error) -> MirrorError {
    if e.raw_os_error() == Some(libc::ENOSPC) {
        MirrorError::WatchLimitExceeded
    } else {
        MirrorError::Watch {
            path: path.to_path_buf(),
            source: e,
        }
    }
}
