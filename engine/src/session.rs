//! Mirror sessions: setup checks, the event loop and lifecycle reporting.
//!
//! Every session runs on its own thread with a single-threaded runtime, so
//! one session's filesystem work never stalls another and a failure stays
//! contained to the session that hit it. Records of one session are applied
//! strictly one after another in arrival order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::applier::{MirrorApplier, Outcome};
use crate::config::MirrorConfig;
use crate::decoder::{ChangeKind, EventDecoder};
use crate::error::{MirrorError, Result};
use crate::event::{EventSender, SessionEvent, SessionEventKind, StopReason};
use crate::installer::install;
use crate::notify_stream::NotifyStream;
use crate::path_map::{PathMapper, resolve_path};
use crate::reconcile::{ReconcileReport, restore};
use crate::watch_table::WatchTable;

/// Entry point for starting sessions and running restores.
#[derive(Debug, Clone)]
pub struct MirrorEngine {
    config: MirrorConfig,
    events: EventSender,
}

impl MirrorEngine {
    /// Create an engine whose sessions report lifecycle events on `events`.
    pub fn new(config: MirrorConfig, events: EventSender) -> Self {
        Self { config, events }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Start mirroring `source` into `target`.
    ///
    /// Returns once every directory of the source is watched and the target
    /// holds a full snapshot of it. Setup errors are returned before any
    /// file is copied.
    pub async fn start_session(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<SessionHandle> {
        let (source, target) = validate_roots(source.as_ref(), target.as_ref(), &self.config)?;
        info!("Starting mirror {} -> {}", source.display(), target.display());

        let cancel = CancellationToken::new();
        let task = SessionTask {
            mapper: PathMapper::new(&source, &target),
            config: self.config.clone(),
            cancel: cancel.clone(),
            events: self.events.clone(),
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let thread = thread::Builder::new()
            .name("mirror-session".to_string())
            .spawn(move || task.run(ready_tx))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(SessionHandle {
                source,
                target,
                cancel,
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MirrorError::SessionTerminated),
        }
    }

    /// Restore `source` from the backup at `target`. Synchronous and not
    /// cancellable.
    pub fn restore(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<ReconcileReport> {
        restore(source.as_ref(), target.as_ref())
    }
}

/// Control handle for one running session.
#[derive(Debug)]
pub struct SessionHandle {
    source: PathBuf,
    target: PathBuf,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Canonical source root.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Canonical target root.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Whether the event loop has exited, for any reason.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the session to stop and wait until its loop exited and its
    /// notification stream was closed.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|_| MirrorError::SessionTerminated)?
            .map_err(|_| MirrorError::SessionTerminated)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Everything a session thread needs, moved onto that thread.
struct SessionTask {
    mapper: PathMapper,
    config: MirrorConfig,
    cancel: CancellationToken,
    events: EventSender,
}

/// State owned by a live session.
struct LiveSession {
    stream: NotifyStream,
    table: WatchTable,
    applier: MirrorApplier,
}

impl SessionTask {
    fn run(self, ready: oneshot::Sender<Result<()>>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = ready.send(Err(MirrorError::Facility(e)));
                return;
            }
        };
        runtime.block_on(self.drive(ready));
    }

    async fn drive(self, ready: oneshot::Sender<Result<()>>) {
        let mut live = match self.setup() {
            Ok(live) => live,
            Err(e) => {
                error!(
                    "Failed to start mirror of {}: {e}",
                    self.mapper.source_root().display()
                );
                let _ = ready.send(Err(e));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }
        self.notify(SessionEventKind::Started);

        let kind = match self.event_loop(&mut live).await {
            Ok(reason) => {
                info!(
                    "Mirror {} -> {} stopped: {reason:?}",
                    self.mapper.source_root().display(),
                    self.mapper.target_root().display()
                );
                SessionEventKind::Stopped { reason }
            }
            Err(e) => {
                error!(
                    "Mirror {} -> {} failed: {e}",
                    self.mapper.source_root().display(),
                    self.mapper.target_root().display()
                );
                SessionEventKind::Fatal {
                    error: e.to_string(),
                }
            }
        };
        drop(live);
        self.notify(kind);
    }

    /// Watch the source tree, then copy it. Watching first means anything
    /// changed during the copy is replayed by the loop afterwards.
    fn setup(&self) -> Result<LiveSession> {
        let source_root = self.mapper.source_root();
        let stream = NotifyStream::open().map_err(MirrorError::Facility)?;
        let mut table = WatchTable::new(self.config.max_watches);

        let root = install(&stream, source_root, &mut table)?
            .ok_or_else(|| MirrorError::SourceNotFound(source_root.to_path_buf()))?;
        let applier = MirrorApplier::new(self.mapper.clone(), root)?;

        let written = applier.snapshot()?;
        info!(
            "Initial snapshot of {} complete: {written} entries, {} directories watched",
            source_root.display(),
            table.len()
        );

        Ok(LiveSession {
            stream,
            table,
            applier,
        })
    }

    async fn event_loop(&self, live: &mut LiveSession) -> Result<StopReason> {
        let mut buf = vec![0u8; self.config.effective_buffer_size()];

        loop {
            if self.cancel.is_cancelled() {
                return Ok(StopReason::ExplicitStop);
            }

            let len = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(StopReason::ExplicitStop),
                read = live.stream.read_batch(&mut buf) => read.map_err(MirrorError::Facility)?,
            };

            for record in EventDecoder::new(&buf[..len]) {
                if record.kind == ChangeKind::SelfInvalidated {
                    live.stream.forget(record.handle);
                }
                match live.applier.apply(&record, &live.stream, &mut live.table) {
                    Ok(Outcome::Continue) => {}
                    Ok(Outcome::SourceVanished) => return Ok(StopReason::SourceVanished),
                    Err(e) if e.is_session_fatal() => return Err(e),
                    Err(e) => warn!(
                        "Skipping {:?} of {:?} under {}: {e}",
                        record.kind, record.name, record.handle
                    ),
                }
            }
        }
    }

    fn notify(&self, kind: SessionEventKind) {
        let event = SessionEvent::new(
            self.mapper.source_root(),
            self.mapper.target_root(),
            kind,
        );
        // A supervisor that stopped listening does not stop the session.
        let _ = self.events.send(event);
    }
}

/// Canonicalize both roots and check them before anything is written.
fn validate_roots(
    source: &Path,
    target: &Path,
    config: &MirrorConfig,
) -> Result<(PathBuf, PathBuf)> {
    let source = match fs::canonicalize(source) {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MirrorError::SourceNotFound(source.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if !source.is_dir() {
        return Err(MirrorError::SourceNotDirectory(source));
    }

    let resolved = resolve_path(target)?;
    if resolved.starts_with(&source) {
        return Err(MirrorError::TargetInsideSource {
            source_root: source,
            target: resolved,
        });
    }

    if !resolved.exists() {
        if !config.create_missing_target {
            return Err(MirrorError::TargetNotDirectory(resolved));
        }
        fs::create_dir_all(&resolved)?;
    }
    let target = fs::canonicalize(&resolved)?;
    if !target.is_dir() {
        return Err(MirrorError::TargetNotDirectory(target));
    }
    if fs::read_dir(&target)?.next().is_some() {
        return Err(MirrorError::TargetNotEmpty(target));
    }

    Ok((source, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn base() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let base = fs::canonicalize(temp_dir.path()).unwrap();
        (temp_dir, base)
    }

    #[test]
    fn test_validate_rejects_missing_source() {
        let (_tmp, base) = base();
        let result = validate_roots(&base.join("nope"), &base.join("t"), &MirrorConfig::new());
        assert!(matches!(result, Err(MirrorError::SourceNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_file_source() {
        let (_tmp, base) = base();
        fs::write(base.join("file"), b"x").unwrap();
        let result = validate_roots(&base.join("file"), &base.join("t"), &MirrorConfig::new());
        assert!(matches!(result, Err(MirrorError::SourceNotDirectory(_))));
    }

    #[test]
    fn test_validate_rejects_nested_target_without_creating_it() {
        let (_tmp, base) = base();
        let source = base.join("s");
        fs::create_dir(&source).unwrap();

        let nested = source.join("backup/deeper");
        let result = validate_roots(&source, &nested, &MirrorConfig::new());
        assert!(matches!(result, Err(MirrorError::TargetInsideSource { .. })));
        assert!(!source.join("backup").exists());

        let same = validate_roots(&source, &source, &MirrorConfig::new());
        assert!(matches!(same, Err(MirrorError::TargetInsideSource { .. })));
    }

    #[test]
    fn test_validate_rejects_non_empty_target() {
        let (_tmp, base) = base();
        let source = base.join("s");
        let target = base.join("t");
        fs::create_dir(&source).unwrap();
        fs::create_dir(&target).unwrap();
        fs::write(target.join("leftover"), b"x").unwrap();

        let result = validate_roots(&source, &target, &MirrorConfig::new());
        assert!(matches!(result, Err(MirrorError::TargetNotEmpty(_))));
    }

    #[test]
    fn test_validate_creates_missing_target() {
        let (_tmp, base) = base();
        let source = base.join("s");
        fs::create_dir(&source).unwrap();

        let (s, t) = validate_roots(&source, &base.join("new/t"), &MirrorConfig::new()).unwrap();
        assert_eq!(s, source);
        assert_eq!(t, base.join("new/t"));
        assert!(t.is_dir());

        let strict = MirrorConfig::new().require_existing_target();
        let result = validate_roots(&source, &base.join("other"), &strict);
        assert!(matches!(result, Err(MirrorError::TargetNotDirectory(_))));
    }

    #[test]
    fn test_sibling_sharing_a_prefix_is_not_nested() {
        let (_tmp, base) = base();
        let source = base.join("data");
        fs::create_dir(&source).unwrap();

        assert!(validate_roots(&source, &base.join("data-backup"), &MirrorConfig::new()).is_ok());
    }
}
