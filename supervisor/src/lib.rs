//! # Backup Supervisor
//!
//! This crate keeps track of which directories are being backed up where.
//! It starts one mirror session per target, refuses to let two sessions
//! share a target, and notices when a session ends on its own.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Supervisor                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   add / end / list / restore / shutdown                          │
//! │        │                                   ▲                    │
//! │        ▼                                   │                    │
//! │  ┌──────────────┐   SessionHandle   ┌──────────────┐            │
//! │  │ MirrorEngine │ ────────────────► │ BackupRecord │            │
//! │  └──────────────┘                   └──────────────┘            │
//! │        │                                   ▲                    │
//! │        ▼                                   │                    │
//! │  session threads ── SessionEvent ──────────┘                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dirmirror_supervisor::Supervisor;
//!
//! let mut supervisor = Supervisor::new(MirrorConfig::default());
//! supervisor.add("/home/me/notes", &["/mnt/backup/notes".into()]).await?;
//!
//! for group in supervisor.list() {
//!     println!("SOURCE: {}", group.source.display());
//! }
//!
//! supervisor.shutdown().await;
//! ```

pub mod error;
pub mod registry;

pub use error::{Result, SupervisorError};
pub use registry::{BackupRecord, BatchOutcome, SourceGroup, Supervisor};

// Re-export from dependencies for convenience
pub use dirmirror_engine::{
    MirrorConfig, ReconcileReport, SessionEvent, SessionEventKind, StopReason,
};
