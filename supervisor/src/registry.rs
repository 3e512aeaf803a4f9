//! Registry of backups and the mirror sessions behind them.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dirmirror_engine::path_map::resolve_path;
use dirmirror_engine::{
    EventReceiver, MirrorConfig, MirrorEngine, MirrorError, ReconcileReport, SessionEvent,
    SessionHandle, event,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};

/// One source to target backup, past or present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Canonical source root.
    pub source: PathBuf,

    /// Canonical target root.
    pub target: PathBuf,

    /// Whether a session is still mirroring this pair.
    pub active: bool,

    /// When the session was started.
    pub started_at: DateTime<Utc>,

    /// When the session was seen to end.
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Active targets of one source, as shown by [`Supervisor::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub source: PathBuf,
    pub targets: Vec<PathBuf>,
}

/// Per-target result of a request naming several targets.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Targets the request succeeded for.
    pub succeeded: Vec<PathBuf>,

    /// Targets the request failed for, with the reason.
    pub failed: Vec<(PathBuf, SupervisorError)>,
}

impl BatchOutcome {
    /// Whether every target succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Starts, tracks and stops mirror sessions.
///
/// Owns the only mutable view of which targets are in use, so two sessions
/// never write into the same target root.
pub struct Supervisor {
    /// Engine sessions are started with.
    engine: MirrorEngine,

    /// Lifecycle events of every session started here.
    events: EventReceiver,

    /// Every backup started, in start order.
    records: Vec<BackupRecord>,

    /// Live sessions keyed by canonical target root.
    sessions: HashMap<PathBuf, SessionHandle>,
}

impl Supervisor {
    /// Create a supervisor whose sessions use `config`.
    pub fn new(config: MirrorConfig) -> Self {
        let (tx, rx) = event::channel();
        Self {
            engine: MirrorEngine::new(config, tx),
            events: rx,
            records: Vec::new(),
            sessions: HashMap::new(),
        }
    }

    /// Start backing `source` up into each of `targets`.
    ///
    /// The request is rejected as a whole if a target is named twice or is
    /// already in use, or if the source is unusable. Otherwise each target
    /// is started on its own and its setup errors are reported per target.
    pub async fn add(
        &mut self,
        source: impl AsRef<Path>,
        targets: &[PathBuf],
    ) -> Result<BatchOutcome> {
        self.poll_events();
        let source = canonical_source(source.as_ref())?;

        let mut resolved: Vec<PathBuf> = Vec::with_capacity(targets.len());
        for target in targets {
            let target = resolve_path(target)?;
            if resolved.contains(&target) {
                return Err(SupervisorError::DuplicateTarget(target));
            }
            if self.sessions.contains_key(&target) {
                return Err(SupervisorError::TargetAlreadyActive(target));
            }
            resolved.push(target);
        }

        let mut outcome = BatchOutcome::default();
        for target in resolved {
            let started_at = Utc::now();
            match self.engine.start_session(&source, &target).await {
                Ok(handle) => {
                    info!(
                        "Backup started: {} -> {}",
                        source.display(),
                        handle.target().display()
                    );
                    self.records.push(BackupRecord {
                        source: source.clone(),
                        target: handle.target().to_path_buf(),
                        active: true,
                        started_at,
                        stopped_at: None,
                    });
                    outcome.succeeded.push(handle.target().to_path_buf());
                    self.sessions.insert(handle.target().to_path_buf(), handle);
                }
                Err(e) => {
                    warn!(
                        "Backup {} -> {} not started: {e}",
                        source.display(),
                        target.display()
                    );
                    outcome.failed.push((target, e.into()));
                }
            }
        }
        Ok(outcome)
    }

    /// Stop the backups of `source` into each of `targets`.
    pub async fn end(
        &mut self,
        source: impl AsRef<Path>,
        targets: &[PathBuf],
    ) -> Result<BatchOutcome> {
        self.poll_events();
        let source = canonical_source(source.as_ref())?;

        let mut outcome = BatchOutcome::default();
        for target in targets {
            let target = resolve_path(target)?;
            let Some(index) = self.active_record(&source, &target) else {
                outcome.failed.push((
                    target.clone(),
                    SupervisorError::NoSuchSession {
                        source_root: source.clone(),
                        target,
                    },
                ));
                continue;
            };

            if let Some(handle) = self.sessions.remove(&target) {
                if let Err(e) = handle.stop().await {
                    warn!(
                        "Backup {} -> {} did not stop cleanly: {e}",
                        source.display(),
                        target.display()
                    );
                }
            }
            self.deactivate(index, Utc::now());
            info!("Backup stopped: {} -> {}", source.display(), target.display());
            outcome.succeeded.push(target);
        }

        self.poll_events();
        Ok(outcome)
    }

    /// Active targets grouped by source, sources in the order they were
    /// first added.
    pub fn list(&mut self) -> Vec<SourceGroup> {
        self.poll_events();

        let mut groups: Vec<SourceGroup> = Vec::new();
        for record in self.records.iter().filter(|r| r.active) {
            match groups.iter_mut().find(|g| g.source == record.source) {
                Some(group) => group.targets.push(record.target.clone()),
                None => groups.push(SourceGroup {
                    source: record.source.clone(),
                    targets: vec![record.target.clone()],
                }),
            }
        }
        groups
    }

    /// Every backup started so far, active or not.
    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }

    /// Number of sessions still running.
    pub fn active_count(&mut self) -> usize {
        self.poll_events();
        self.sessions.len()
    }

    /// Restore `source` from the backup at `target`.
    ///
    /// Runs on the blocking pool; a running backup of the same pair keeps
    /// running and mirrors the repaired entries back, which leaves the
    /// target unchanged.
    pub async fn restore(
        &self,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Result<ReconcileReport> {
        let (source, target) = (source.into(), target.into());
        let engine = self.engine.clone();
        let report =
            tokio::task::spawn_blocking(move || engine.restore(source, target)).await??;
        Ok(report)
    }

    /// Stop every running session. Returns how many were stopped.
    pub async fn shutdown(&mut self) -> usize {
        self.poll_events();
        let sessions: Vec<_> = self.sessions.drain().collect();
        let stopped = sessions.len();

        for (target, handle) in sessions {
            if let Err(e) = handle.stop().await {
                warn!("Backup into {} did not stop cleanly: {e}", target.display());
            }
        }
        let now = Utc::now();
        for record in self.records.iter_mut().filter(|r| r.active) {
            record.active = false;
            record.stopped_at = Some(now);
        }
        self.poll_events();
        info!("Supervisor shut down, {stopped} backups stopped");
        stopped
    }

    /// Apply lifecycle events that arrived since the last call and return
    /// them.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            debug!(
                "Session {} -> {}: {:?}",
                event.source.display(),
                event.target.display(),
                event.kind
            );
            if event.is_terminal() {
                self.session_ended(&event);
            }
            seen.push(event);
        }
        seen
    }

    fn session_ended(&mut self, event: &SessionEvent) {
        let Some(index) = self.active_record(&event.source, &event.target) else {
            return;
        };
        // A stale event of an earlier session on the same pair.
        if self.records[index].started_at > event.timestamp {
            return;
        }
        self.sessions.remove(&event.target);
        self.deactivate(index, event.timestamp);
        info!(
            "Backup ended: {} -> {} ({:?})",
            event.source.display(),
            event.target.display(),
            event.kind
        );
    }

    fn active_record(&self, source: &Path, target: &Path) -> Option<usize> {
        self.records
            .iter()
            .rposition(|r| r.active && r.source == source && r.target == target)
    }

    fn deactivate(&mut self, index: usize, at: DateTime<Utc>) {
        let record = &mut self.records[index];
        record.active = false;
        record.stopped_at = Some(at);
    }
}

fn canonical_source(source: &Path) -> Result<PathBuf> {
    let canonical = match fs::canonicalize(source) {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MirrorError::SourceNotFound(source.to_path_buf()).into());
        }
        Err(e) => return Err(e.into()),
    };
    if !canonical.is_dir() {
        return Err(MirrorError::SourceNotDirectory(canonical).into());
    }
    Ok(canonical)
}
