//! Full-tree reconciliation used by restore.
//!
//! Walks a template tree and repairs a second tree until both hold the same
//! paths, types, file bytes and (root-rewritten) link targets. Only directory
//! containment is followed; links are compared as text, so cyclic links can
//! not make the walk loop.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::symlink;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MirrorError, Result};
use crate::fsops::{EntryKind, copy_file, create_dir, remove_entry};
use crate::path_map::resolve_path;
use crate::symlink::SymlinkRewriter;

const CHUNK_SIZE: usize = 64 * 1024;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Regular files written from the template.
    pub files_restored: usize,

    /// Symlinks recreated from the template.
    pub links_restored: usize,

    /// Directories created.
    pub dirs_created: usize,

    /// Entries removed because the template lacks them or their type differs.
    pub entries_removed: usize,

    /// Entries already identical to the template.
    pub unchanged: usize,
}

impl ReconcileReport {
    /// Number of filesystem mutations performed.
    pub fn writes(&self) -> usize {
        self.files_restored + self.links_restored + self.dirs_created + self.entries_removed
    }
}

/// Restore `source_root` from the backup held at `target_root`.
///
/// The target is the template and is only read. A missing source root is
/// created. Roots nested in either direction are refused before anything
/// is written. Runs to completion on the calling thread.
pub fn restore(source_root: &Path, target_root: &Path) -> Result<ReconcileReport> {
    let target_root = match fs::canonicalize(target_root) {
        Ok(path) if path.is_dir() => path,
        _ => return Err(MirrorError::TargetNotDirectory(target_root.to_path_buf())),
    };
    let resolved = resolve_path(source_root)?;
    if resolved.starts_with(&target_root) {
        return Err(MirrorError::SourceInsideTarget {
            source_root: resolved,
            target: target_root,
        });
    }
    if target_root.starts_with(&resolved) {
        return Err(MirrorError::TargetInsideSource {
            source_root: resolved,
            target: target_root,
        });
    }

    fs::create_dir_all(&resolved)?;
    let source_root = fs::canonicalize(&resolved)?;

    info!(
        "Restoring {} from {}",
        source_root.display(),
        target_root.display()
    );
    let report = converge(&source_root, &target_root)?;
    info!(
        "Restore complete: {} writes, {} unchanged",
        report.writes(),
        report.unchanged
    );
    Ok(report)
}

/// Make `repair_root` structurally identical to `template_root`.
pub fn converge(repair_root: &Path, template_root: &Path) -> io::Result<ReconcileReport> {
    let mut reconciler = Reconciler {
        rewriter: SymlinkRewriter::new(template_root, repair_root)?,
        report: ReconcileReport::default(),
    };
    reconciler.entry(repair_root, template_root)?;
    Ok(reconciler.report)
}

struct Reconciler {
    rewriter: SymlinkRewriter,
    report: ReconcileReport,
}

impl Reconciler {
    fn entry(&mut self, repair: &Path, template: &Path) -> io::Result<()> {
        let Some(wanted) = EntryKind::probe(template)? else {
            debug!("Template entry vanished: {}", template.display());
            return Ok(());
        };
        if wanted == EntryKind::Other {
            debug!("Skipping special file {}", template.display());
            return Ok(());
        }

        let mut existing = EntryKind::probe(repair)?;
        if existing.is_some_and(|kind| kind != wanted) {
            remove_entry(repair)?;
            self.report.entries_removed += 1;
            existing = None;
        }

        match wanted {
            EntryKind::File => self.file(repair, template, existing.is_some()),
            EntryKind::Symlink => self.link(repair, template, existing.is_some()),
            EntryKind::Directory => self.directory(repair, template, existing.is_some()),
            EntryKind::Other => Ok(()),
        }
    }

    fn file(&mut self, repair: &Path, template: &Path, exists: bool) -> io::Result<()> {
        if exists && contents_equal(repair, template)? {
            self.report.unchanged += 1;
            return Ok(());
        }
        copy_file(template, repair)?;
        debug!("Restored file {}", repair.display());
        self.report.files_restored += 1;
        Ok(())
    }

    fn link(&mut self, repair: &Path, template: &Path, exists: bool) -> io::Result<()> {
        let wanted = self.rewriter.rewritten(&fs::read_link(template)?);
        if exists && fs::read_link(repair)? == wanted {
            self.report.unchanged += 1;
            return Ok(());
        }
        remove_entry(repair)?;
        symlink(&wanted, repair)?;
        debug!(
            "Restored link {} -> {}",
            repair.display(),
            wanted.display()
        );
        self.report.links_restored += 1;
        Ok(())
    }

    fn directory(&mut self, repair: &Path, template: &Path, exists: bool) -> io::Result<()> {
        if exists {
            self.report.unchanged += 1;
        } else {
            create_dir(repair)?;
            self.report.dirs_created += 1;
        }

        for name in sorted_names(template)? {
            self.entry(&repair.join(&name), &template.join(&name))?;
        }

        for name in sorted_names(repair)? {
            let extra = repair.join(&name);
            if EntryKind::probe(&template.join(&name))?.is_none() && remove_entry(&extra)? {
                debug!("Removed extra entry {}", extra.display());
                self.report.entries_removed += 1;
            }
        }
        Ok(())
    }
}

fn sorted_names(dir: &Path) -> io::Result<Vec<std::ffi::OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

/// Byte-exact comparison of two regular files, read in chunks.
pub fn contents_equal(a: &Path, b: &Path) -> io::Result<bool> {
    let (file_a, file_b) = (File::open(a)?, File::open(b)?);
    if file_a.metadata()?.len() != file_b.metadata()?.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::with_capacity(CHUNK_SIZE, file_a);
    let mut reader_b = BufReader::with_capacity(CHUNK_SIZE, file_b);
    loop {
        let chunk_a = reader_a.fill_buf()?;
        let chunk_b = reader_b.fill_buf()?;
        if chunk_a.is_empty() || chunk_b.is_empty() {
            return Ok(chunk_a.is_empty() && chunk_b.is_empty());
        }
        let n = chunk_a.len().min(chunk_b.len());
        if chunk_a[..n] != chunk_b[..n] {
            return Ok(false);
        }
        reader_a.consume(n);
        reader_b.consume(n);
    }
}
