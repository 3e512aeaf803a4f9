//! # Directory Mirror Engine
//!
//! This crate keeps a backup directory continuously identical to a live
//! source directory, and can restore the source from the backup.
//!
//! ## Features
//!
//! - **Live Mirroring**: Every directory of the source is watched through
//!   inotify and changes are replayed into the target as they happen
//! - **Symlink Rewriting**: Absolute links into the source are rebased onto
//!   the target so the backup never points back into the live tree
//! - **Restore**: A full reconciliation pass repairs the source from the
//!   backup, touching only what differs
//! - **Session Isolation**: Each session owns its own thread, watch table and
//!   notification stream
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Mirror Session                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  NotifyStream ──► EventDecoder ──► MirrorApplier ──► target    │
//! │     ▲                                   │                       │
//! │     └────────── install() ◄─────────────┤                       │
//! │                │                        ▼                       │
//! │           WatchTable          PathMapper + SymlinkRewriter      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod applier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod fsops;
pub mod installer;
pub mod notify_stream;
pub mod path_map;
pub mod reconcile;
pub mod session;
pub mod symlink;
pub mod watch_table;

pub use applier::{MirrorApplier, Outcome};
pub use config::MirrorConfig;
pub use decoder::{ChangeKind, ChangeRecord, EventDecoder};
pub use error::{MirrorError, Result};
pub use event::{EventReceiver, EventSender, SessionEvent, SessionEventKind, StopReason};
pub use notify_stream::NotifyStream;
pub use path_map::PathMapper;
pub use reconcile::{ReconcileReport, converge, restore};
pub use session::{MirrorEngine, SessionHandle};
pub use symlink::SymlinkRewriter;
pub use watch_table::{WatchHandle, WatchTable};
