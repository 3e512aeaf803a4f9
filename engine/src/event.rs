//! Lifecycle notifications sent from sessions to their supervisor.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel end sessions publish lifecycle events on.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving end of [`EventSender`].
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create a lifecycle event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A lifecycle event of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Source root of the session.
    pub source: PathBuf,

    /// Target root of the session.
    pub target: PathBuf,

    /// What happened.
    pub kind: SessionEventKind,

    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        kind: SessionEventKind,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether the session is over once this event is seen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, SessionEventKind::Started)
    }
}

/// Kind of lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    /// Watches are installed and the initial snapshot is in place.
    Started,

    /// The event loop exited.
    Stopped { reason: StopReason },

    /// The session hit an unrecoverable error and was torn down.
    Fatal { error: String },
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Its handle was told to stop.
    ExplicitStop,

    /// The source root was deleted or moved away.
    SourceVanished,
}
