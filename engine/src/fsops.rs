//! Idempotent filesystem mutations shared by the applier, the initial
//! snapshot and the reconciler.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::path_map::rebase;
use crate::symlink::SymlinkRewriter;

const FILE_MODE: u32 = 0o666;

/// Type of a directory entry, never following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Fifo, socket or device node. Never mirrored.
    Other,
}

impl EntryKind {
    pub fn of(meta: &Metadata) -> Self {
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }

    /// Kind of the entry at `path`, `None` if nothing is there.
    pub fn probe(path: &Path) -> io::Result<Option<Self>> {
        match fs::symlink_metadata(path) {
            Ok(meta) => Ok(Some(Self::of(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Remove whatever is at `path`, recursively for directories. Returns
/// whether anything was removed.
pub fn remove_entry(path: &Path) -> io::Result<bool> {
    let result = match EntryKind::probe(path)? {
        None => return Ok(false),
        Some(EntryKind::Directory) => fs::remove_dir_all(path),
        Some(_) => fs::remove_file(path),
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create a directory at `path`. An existing directory is left alone; any
/// other entry in the way is replaced. Returns whether a directory was made.
pub fn create_dir(path: &Path) -> io::Result<bool> {
    match EntryKind::probe(path)? {
        Some(EntryKind::Directory) => return Ok(false),
        Some(_) => {
            remove_entry(path)?;
        }
        None => {}
    }
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Replace `dst` with a full copy of the regular file `src`.
///
/// Anything at `dst` that is not a regular file is removed first so the
/// copy never writes through a symlink. The copy is created with mode 0666
/// (less the umask) rather than the source's bits, and a destination that
/// refuses writes is replaced.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    match EntryKind::probe(dst)? {
        None | Some(EntryKind::File) => {}
        Some(_) => {
            remove_entry(dst)?;
        }
    }

    let mut reader = File::open(src)?;
    let mut writer = match open_for_copy(dst) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!("Replacing unwritable copy {}", dst.display());
            remove_entry(dst)?;
            open_for_copy(dst)?
        }
        result => result?,
    };
    io::copy(&mut reader, &mut writer)
}

fn open_for_copy(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)
}

/// Copy the subtree at `src` to `dst`, directories before their contents.
///
/// Entries that disappear while the walk runs are skipped. Returns the
/// number of entries written.
pub fn copy_tree(src: &Path, dst: &Path, rewriter: &SymlinkRewriter) -> io::Result<usize> {
    let mut written = 0;
    let walker = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) {
                    debug!("Entry vanished during copy: {err}");
                    continue;
                }
                return Err(err.into());
            }
        };
        let Some(dst_path) = rebase(entry.path(), src, dst) else {
            continue;
        };

        let file_type = entry.file_type();
        let result = if file_type.is_dir() {
            create_dir(&dst_path).map(|_| ())
        } else if file_type.is_symlink() {
            rewriter.copy(entry.path(), &dst_path).map(|_| ())
        } else if file_type.is_file() {
            copy_file(entry.path(), &dst_path).map(|_| ())
        } else {
            debug!("Skipping special file {}", entry.path().display());
            continue;
        };

        match result {
            Ok(()) => written += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Entry vanished during copy: {}", entry.path().display());
            }
            Err(e) => return Err(e),
        }
    }

    Ok(written)
}
