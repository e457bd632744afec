//! The authoritative set of watched backup/snapshot directories
//!
//! A `WatchSet` is owned by exactly one thread (see [`crate::reconcile`]).
//! Every membership change goes through `add`, `remove` or `rescan`, which
//! keep the set and the OS registrations in step: no registration for a path
//! that is gone, and never two registrations for the same path.

use crate::WatchError;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use snapship_core::UploadFilter;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// OS-level directory watch registration
pub trait WatchBackend {
    /// Register non-recursive notification for `path`
    fn watch(&mut self, path: &Path) -> notify::Result<()>;

    /// Deregister notification for `path`
    fn unwatch(&mut self, path: &Path) -> notify::Result<()>;
}

impl WatchBackend for RecommendedWatcher {
    fn watch(&mut self, path: &Path) -> notify::Result<()> {
        Watcher::watch(self, path, RecursiveMode::NonRecursive)
    }

    fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        Watcher::unwatch(self, path)
    }
}

/// Outcome of a rescan pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RescanSummary {
    /// Newly registered directories
    pub added: usize,
    /// Paths registered by this pass, in walk order
    pub added_paths: Vec<PathBuf>,
    /// Watched directories no longer found
    pub retired: usize,
    /// Discovered directories that vanished before registration
    pub dropped: usize,
    /// Watched directories after the pass
    pub watched: usize,
}

/// Watched directories plus the backend that holds their registrations
pub struct WatchSet<B: WatchBackend> {
    backend: B,
    filter: UploadFilter,
    watched: BTreeSet<PathBuf>,
}

impl<B: WatchBackend> WatchSet<B> {
    pub fn new(backend: B, filter: UploadFilter) -> Self {
        Self {
            backend,
            filter,
            watched: BTreeSet::new(),
        }
    }

    /// Register a watch on `path`.
    ///
    /// Returns `Ok(false)` when the path disappeared before registration.
    /// Any other backend failure is fatal: a partial watch set loses data silently.
    pub fn register_watch(&mut self, path: &Path) -> Result<bool, WatchError> {
        match self.backend.watch(path) {
            Ok(()) => {
                self.watched.insert(path.to_path_buf());
                Ok(true)
            }
            Err(e) if is_vanished(&e, path) => {
                debug!("Directory vanished before it could be watched: {}", path.display());
                Ok(false)
            }
            Err(source) => Err(WatchError::Register {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Watch `path` unless it is already watched
    pub fn add(&mut self, path: &Path) -> Result<bool, WatchError> {
        if self.watched.contains(path) {
            return Ok(false);
        }
        self.register_watch(path)
    }

    /// Stop watching `path`. Returns whether it was watched.
    pub fn remove(&mut self, path: &Path) -> bool {
        if !self.watched.remove(path) {
            return false;
        }

        // inotify drops the watch itself when the directory is deleted
        match self.backend.unwatch(path) {
            Ok(()) => {}
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => {}
            Err(e) if is_vanished(&e, path) => {}
            Err(e) => warn!("Failed to unwatch {}: {}", path.display(), e),
        }
        true
    }

    /// Stop watching `path` and every watched directory beneath it
    pub fn forget(&mut self, path: &Path) -> Vec<PathBuf> {
        let doomed: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|watched| watched.starts_with(path))
            .cloned()
            .collect();

        for watched in &doomed {
            self.remove(watched);
        }
        doomed
    }

    /// Walk the root and reconcile the watch set with what is on disk
    pub fn rescan(&mut self) -> Result<RescanSummary, WatchError> {
        let found = self.discover();
        let mut summary = RescanSummary::default();

        let stale: Vec<PathBuf> = self.watched.difference(&found).cloned().collect();
        for path in stale {
            info!("Retiring watch on {}", path.display());
            self.remove(&path);
            summary.retired += 1;
        }

        for path in found {
            if self.watched.contains(&path) {
                continue;
            }
            if self.register_watch(&path)? {
                info!("Watching {}", path.display());
                summary.added += 1;
                summary.added_paths.push(path);
            } else {
                summary.dropped += 1;
            }
        }

        summary.watched = self.watched.len();
        Ok(summary)
    }

    /// Find every backup/snapshot directory beneath the root
    fn discover(&self) -> BTreeSet<PathBuf> {
        let filter = &self.filter;
        let mut found = BTreeSet::new();

        // Reserved subtrees are pruned, not merely skipped
        let walker = WalkDir::new(filter.root())
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && filter.is_reserved(e.path())));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let vanished = e
                        .io_error()
                        .map(|io| io.kind() == io::ErrorKind::NotFound)
                        .unwrap_or(false);
                    if vanished {
                        debug!("Entry vanished during rescan: {}", e);
                    } else {
                        warn!("Rescan could not read an entry: {}", e);
                    }
                    continue;
                }
            };

            if entry.file_type().is_dir() && filter.should_watch_dir(entry.path()) {
                found.insert(entry.into_path());
            }
        }

        found
    }

    /// Copy of the current watch set
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.watched.iter().cloned().collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    pub fn filter(&self) -> &UploadFilter {
        &self.filter
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// Whether a registration error means the path no longer exists
fn is_vanished(err: &notify::Error, path: &Path) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) if io.kind() == io::ErrorKind::NotFound => true,
        notify::ErrorKind::Generic(_) => !path.exists(),
        _ => false,
    }
}
