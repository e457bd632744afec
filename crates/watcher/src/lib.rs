//! File system watching for Snapship
//!
//! This crate provides:
//! - A dynamic watch set over backup/snapshot directories, owned by one thread
//! - Periodic rescans that discover and retire watch targets
//! - Translation of notify events into a closed event enum
//! - Classification of events into upload tasks

pub mod classify;
pub mod platform;
pub mod pump;
pub mod reconcile;
pub mod watchset;

pub use classify::Classifier;
pub use pump::EventPump;
pub use reconcile::{Reconciler, WatchCommand, WatchHandle};
pub use watchset::{RescanSummary, WatchBackend, WatchSet};

use std::path::PathBuf;

/// File system event, translated once at the notification boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemEvent {
    /// Path that changed
    pub path: PathBuf,
    /// Type of change
    pub kind: FsEventKind,
    /// Directory hint from the backend (unreliable across platforms)
    pub is_dir_hint: bool,
}

impl FileSystemEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir_hint: false,
        }
    }
}

/// Type of file system event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    /// Entry created in a watched directory
    Created,
    /// Entry moved into a watched directory
    MovedIn,
    /// Entry contents or metadata changed
    Modified,
    /// Entry removed or moved away
    Deleted,
    /// A directory itself was removed
    SelfDeleted,
}

impl FsEventKind {
    /// Kinds every watch registers interest in
    pub const REGISTERED: [FsEventKind; 4] = [
        FsEventKind::Created,
        FsEventKind::MovedIn,
        FsEventKind::Deleted,
        FsEventKind::SelfDeleted,
    ];

    pub fn is_delete(self) -> bool {
        matches!(self, FsEventKind::Deleted | FsEventKind::SelfDeleted)
    }

    pub fn is_registered(self) -> bool {
        Self::REGISTERED.contains(&self)
    }
}

/// Watch subsystem errors
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The OS notification backend could not be created
    #[error("failed to initialize file watcher: {0}")]
    Init(#[source] notify::Error),

    /// Registration failed for a reason other than the path vanishing
    #[error("failed to watch {path}: {source}")]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The watch-set owner is no longer running
    #[error("watch-set owner is not running")]
    Disconnected,
}
