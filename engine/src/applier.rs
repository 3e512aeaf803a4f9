//! Translation of change records into mutations of the mirror.

use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::decoder::{ChangeKind, ChangeRecord};
use crate::error::Result;
use crate::fsops::{EntryKind, copy_file, copy_tree, create_dir, remove_entry};
use crate::installer::{WatchRegistrar, install, is_vanished, watch_error};
use crate::path_map::PathMapper;
use crate::reconcile::converge;
use crate::symlink::SymlinkRewriter;
use crate::watch_table::{WatchHandle, WatchTable};

/// What the session should do after a record was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading events.
    Continue,

    /// The source root was deleted or moved away.
    SourceVanished,
}

/// Applies change records from one source tree to its mirror.
#[derive(Debug)]
pub struct MirrorApplier {
    mapper: PathMapper,
    rewriter: SymlinkRewriter,
    root_handle: WatchHandle,
}

impl MirrorApplier {
    pub fn new(mapper: PathMapper, root_handle: WatchHandle) -> io::Result<Self> {
        let rewriter = SymlinkRewriter::new(mapper.source_root(), mapper.target_root())?;
        Ok(Self {
            mapper,
            rewriter,
            root_handle,
        })
    }

    /// Copy the whole source tree into the target. Returns the number of
    /// entries written.
    pub fn snapshot(&self) -> io::Result<usize> {
        copy_tree(
            self.mapper.source_root(),
            self.mapper.target_root(),
            &self.rewriter,
        )
    }

    /// Apply one record. Every mutation tolerates already being done.
    pub fn apply(
        &self,
        record: &ChangeRecord,
        registrar: &impl WatchRegistrar,
        table: &mut WatchTable,
    ) -> Result<Outcome> {
        if record.kind == ChangeKind::Overflow {
            return self.resync(registrar, table);
        }

        let Some(dir) = table.find(record.handle).map(Path::to_path_buf) else {
            debug!(
                "Ignoring {:?} for released watch {}",
                record.kind, record.handle
            );
            return Ok(Outcome::Continue);
        };

        match record.kind {
            ChangeKind::SelfInvalidated => return Ok(self.invalidated(record.handle, &dir, table)),
            ChangeKind::SelfMoved => return self.self_moved(record.handle, &dir, registrar, table),
            _ => {}
        }

        let Some(name) = &record.name else {
            return Ok(Outcome::Continue);
        };
        let source = dir.join(name);
        let Some(target) = self.mapper.to_target(&source) else {
            warn!("Watched path escaped the source root: {}", source.display());
            return Ok(Outcome::Continue);
        };

        match record.kind {
            ChangeKind::Created | ChangeKind::MovedTo => {
                self.created(&source, &target, registrar, table)?
            }
            ChangeKind::Removed | ChangeKind::MovedFrom => {
                if remove_entry(&target)? {
                    debug!("Removed {}", target.display());
                }
            }
            ChangeKind::Modified => {
                if EntryKind::probe(&source)? == Some(EntryKind::File) {
                    copy_file(&source, &target)?;
                    debug!("Updated {}", target.display());
                }
            }
            ChangeKind::SelfMoved | ChangeKind::SelfInvalidated | ChangeKind::Overflow => {}
        }
        Ok(Outcome::Continue)
    }

    fn created(
        &self,
        source: &Path,
        target: &Path,
        registrar: &impl WatchRegistrar,
        table: &mut WatchTable,
    ) -> Result<()> {
        let Some(kind) = EntryKind::probe(source)? else {
            debug!("Created entry already gone: {}", source.display());
            return Ok(());
        };

        match kind {
            EntryKind::Directory => {
                create_dir(target)?;
                install(registrar, source, table)?;
                // Entries created before the new watches existed produced no
                // events, so copy whatever is there now.
                copy_tree(source, target, &self.rewriter)?;
                debug!("Mirrored directory {}", target.display());
            }
            EntryKind::File => {
                copy_file(source, target)?;
                debug!("Copied {}", target.display());
            }
            EntryKind::Symlink => {
                let text = self.rewriter.copy(source, target)?;
                debug!("Linked {} -> {}", target.display(), text.display());
            }
            EntryKind::Other => debug!("Skipping special file {}", source.display()),
        }
        Ok(())
    }

    fn invalidated(&self, handle: WatchHandle, dir: &Path, table: &mut WatchTable) -> Outcome {
        table.remove(handle);
        if handle == self.root_handle {
            info!("Source root {} is gone", dir.display());
            return Outcome::SourceVanished;
        }
        debug!("Released watch {handle} for {}", dir.display());
        Outcome::Continue
    }

    /// A watched directory was renamed. An in-tree move has already
    /// re-registered its handles under the new path, so only entries whose
    /// recorded path no longer leads to the same watch are dropped.
    fn self_moved(
        &self,
        handle: WatchHandle,
        dir: &Path,
        registrar: &impl WatchRegistrar,
        table: &mut WatchTable,
    ) -> Result<Outcome> {
        if handle == self.root_handle {
            info!("Source root {} was moved away", dir.display());
            table.remove(handle);
            return Ok(Outcome::SourceVanished);
        }

        revalidate(dir, registrar, table)?;
        Ok(Outcome::Continue)
    }

    /// The kernel dropped events: re-watch everything and converge the
    /// mirror on the current source tree.
    fn resync(&self, registrar: &impl WatchRegistrar, table: &mut WatchTable) -> Result<Outcome> {
        let source_root = self.mapper.source_root();
        warn!(
            "Event queue overflowed, rescanning {}",
            source_root.display()
        );
        // Releases of deleted directories may have been among the lost
        // events, so stale entries go before the tree is watched again.
        revalidate(source_root, registrar, table)?;
        if install(registrar, source_root, table)?.is_none() {
            return Ok(Outcome::SourceVanished);
        }
        let report = converge(self.mapper.target_root(), source_root)?;
        info!("Resync finished with {} writes", report.writes());
        Ok(Outcome::Continue)
    }
}

/// Re-watch every table entry at or below `dir` and drop the entries whose
/// recorded path no longer leads to the same watch.
fn revalidate(
    dir: &Path,
    registrar: &impl WatchRegistrar,
    table: &mut WatchTable,
) -> Result<()> {
    for (stale, path) in table.entries_under(dir) {
        match registrar.watch_directory(&path) {
            Ok(current) if current == stale => continue,
            Ok(current) => table.add(current, path.clone())?,
            Err(e) if is_vanished(&e) => {}
            Err(e) => return Err(watch_error(&path, e)),
        }
        table.remove(stale);
        if let Err(e) = registrar.unwatch(stale) {
            debug!("Watch {stale} already released: {e}");
        }
        debug!("Dropped stale watch {stale} for {}", path.display());
    }
    Ok(())
}
