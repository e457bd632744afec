//! Periodic rescan loop
//!
//! Owns the [`WatchSet`] for its whole life. Rescans the root on a fixed
//! interval so directories created by the upstream rotation get watched
//! within one interval, and applies deletions reported by the event pump.
//! Other threads never touch the set; they send [`WatchCommand`]s.
//!
//! A directory that only becomes watched after the first rescan may already
//! hold files that no event will ever report. When an upload queue is
//! attached, each such directory is queued for expansion as it is added.

use crate::watchset::{RescanSummary, WatchBackend, WatchSet};
use crate::WatchError;
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use snapship_core::{DestinationKeys, UploadTask};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Messages to the watch-set owner
#[derive(Debug)]
pub enum WatchCommand {
    /// A path (or one of its ancestors) was deleted
    Forget(PathBuf),
    /// Rescan now instead of waiting for the next tick
    Rescan,
    /// Reply with a copy of the watch set
    Snapshot(Sender<Vec<PathBuf>>),
    /// Stop the loop and release every OS watch
    Shutdown,
}

/// Rescan loop owning the watch set
pub struct Reconciler<B: WatchBackend> {
    /// Watched directories and their registrations
    watch_set: WatchSet<B>,

    /// Rescan interval (default: 5 minutes)
    interval: Duration,

    /// Requests from other threads
    commands: Receiver<WatchCommand>,

    /// Where late-discovered directories are queued (optional)
    uploads: Option<DirectoryUploads>,
}

struct DirectoryUploads {
    tasks: Sender<UploadTask>,
    keys: DestinationKeys,
}

impl<B: WatchBackend> Reconciler<B> {
    /// Create a reconciler and the sender other threads use to reach it
    pub fn new(watch_set: WatchSet<B>, interval: Duration) -> (Self, Sender<WatchCommand>) {
        let (tx, rx) = unbounded();
        let reconciler = Self {
            watch_set,
            interval,
            commands: rx,
            uploads: None,
        };
        (reconciler, tx)
    }

    /// Queue directories added after the initial rescan for upload
    pub fn with_uploads(mut self, tasks: Sender<UploadTask>, keys: DestinationKeys) -> Self {
        self.uploads = Some(DirectoryUploads { tasks, keys });
        self
    }

    /// Run the loop until shutdown.
    ///
    /// The first rescan happens immediately. Returns an error only for a
    /// fatal watch registration failure.
    pub fn run(mut self) -> Result<(), WatchError> {
        info!(
            "Starting periodic rescans of {} (interval: {:?})",
            self.watch_set.filter().root().display(),
            self.interval
        );

        // Content present at startup is not reshipped
        self.rescan()?;
        let ticker = tick(self.interval);
        let commands = self.commands.clone();

        loop {
            select! {
                recv(ticker) -> _ => {
                    let summary = self.rescan()?;
                    self.queue_added(summary.added_paths);
                }
                recv(commands) -> command => match command {
                    Ok(WatchCommand::Forget(path)) => {
                        for retired in self.watch_set.forget(&path) {
                            info!("Watched directory deleted: {}", retired.display());
                        }
                    }
                    Ok(WatchCommand::Rescan) => {
                        info!("Rescan requested");
                        let summary = self.rescan()?;
                        self.queue_added(summary.added_paths);
                    }
                    Ok(WatchCommand::Snapshot(reply)) => {
                        let _ = reply.send(self.watch_set.snapshot());
                    }
                    Ok(WatchCommand::Shutdown) | Err(_) => break,
                },
            }
        }

        info!("Rescan loop stopped ({} directories were watched)", self.watch_set.len());
        Ok(())
    }

    fn rescan(&mut self) -> Result<RescanSummary, WatchError> {
        let summary = self.watch_set.rescan()?;

        if summary.added > 0 || summary.retired > 0 {
            info!(
                "Rescan: {} added, {} retired, {} watched",
                summary.added, summary.retired, summary.watched
            );
        } else {
            debug!("Rescan: no changes ({} watched)", summary.watched);
        }
        Ok(summary)
    }

    fn queue_added(&mut self, added: Vec<PathBuf>) {
        let Some(uploads) = self.uploads.take() else {
            return;
        };

        for path in added {
            let Some(key) = uploads.keys.key_for(&path) else {
                continue;
            };
            debug!("Queueing contents of newly watched {}", path.display());
            // Blocks while the upload queue is full
            if uploads.tasks.send(UploadTask::directory(path, key)).is_err() {
                warn!("Upload queue closed, no longer queueing new directories");
                return;
            }
        }
        self.uploads = Some(uploads);
    }
}

impl<B: WatchBackend + Send + 'static> Reconciler<B> {
    /// Run the loop on a dedicated thread
    pub fn spawn(self, commands: Sender<WatchCommand>) -> Result<WatchHandle, WatchError> {
        let thread = thread::Builder::new()
            .name("snapship-reconcile".to_string())
            .spawn(move || self.run())
            .map_err(|source| WatchError::Spawn {
                name: "reconcile",
                source,
            })?;

        Ok(WatchHandle { commands, thread })
    }
}

/// Handle to a running rescan loop
pub struct WatchHandle {
    commands: Sender<WatchCommand>,
    thread: JoinHandle<Result<(), WatchError>>,
}

impl WatchHandle {
    /// Sender for the event pump
    pub fn commands(&self) -> Sender<WatchCommand> {
        self.commands.clone()
    }

    /// Current watch set, as seen by the owner
    pub fn snapshot(&self) -> Result<Vec<PathBuf>, WatchError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(WatchCommand::Snapshot(tx))
            .map_err(|_| WatchError::Disconnected)?;
        rx.recv().map_err(|_| WatchError::Disconnected)
    }

    /// Ask for an immediate rescan
    pub fn rescan(&self) -> Result<(), WatchError> {
        self.commands
            .send(WatchCommand::Rescan)
            .map_err(|_| WatchError::Disconnected)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the loop and wait for it
    pub fn shutdown(self) -> Result<(), WatchError> {
        let _ = self.commands.send(WatchCommand::Shutdown);
        self.join()
    }

    /// Wait for the loop to end on its own (fatal error or shutdown)
    pub fn join(self) -> Result<(), WatchError> {
        self.thread.join().unwrap_or(Err(WatchError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use snapship_core::{CommonMetadata, Target, UploadFilter};
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Backend whose registrations stay observable after it moves to the loop thread
    #[derive(Clone, Default)]
    struct SharedBackend {
        registered: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl WatchBackend for SharedBackend {
        fn watch(&mut self, path: &Path) -> notify::Result<()> {
            self.registered.lock().push(path.to_path_buf());
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
            self.registered.lock().retain(|p| p != path);
            Ok(())
        }
    }

    fn spawn_loop(root: &Path, interval: Duration) -> (WatchHandle, SharedBackend) {
        let backend = SharedBackend::default();
        let set = WatchSet::new(backend.clone(), UploadFilter::new(root));
        let (reconciler, commands) = Reconciler::new(set, interval);
        (reconciler.spawn(commands).unwrap(), backend)
    }

    #[test]
    fn test_initial_rescan_runs_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("ks/t/backups")).unwrap();

        let (handle, _backend) = spawn_loop(root, Duration::from_secs(300));

        assert_eq!(handle.snapshot().unwrap(), vec![root.join("ks/t/backups")]);
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_forget_command_retires_watch() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let snapshots = root.join("ks/t/snapshots");
        fs::create_dir_all(&snapshots).unwrap();

        let (handle, backend) = spawn_loop(root, Duration::from_secs(300));
        handle.snapshot().unwrap();

        fs::remove_dir_all(&snapshots).unwrap();
        handle.commands().send(WatchCommand::Forget(snapshots.clone())).unwrap();

        assert!(handle.snapshot().unwrap().is_empty());
        assert!(backend.registered.lock().is_empty());
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_rescan_command_picks_up_new_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let (handle, _backend) = spawn_loop(root, Duration::from_secs(300));
        assert!(handle.snapshot().unwrap().is_empty());

        fs::create_dir_all(root.join("ks/t/snapshots")).unwrap();
        handle.rescan().unwrap();

        assert_eq!(handle.snapshot().unwrap(), vec![root.join("ks/t/snapshots")]);
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_periodic_rescan_within_one_interval() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let (handle, _backend) = spawn_loop(root, Duration::from_millis(100));
        handle.snapshot().unwrap();

        fs::create_dir_all(root.join("ks/t/backups")).unwrap();
        thread::sleep(Duration::from_millis(400));

        assert_eq!(handle.snapshot().unwrap(), vec![root.join("ks/t/backups")]);
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_loop_stops_when_senders_drop() {
        let temp_dir = TempDir::new().unwrap();
        let set = WatchSet::new(SharedBackend::default(), UploadFilter::new(temp_dir.path()));
        let (reconciler, commands) = Reconciler::new(set, Duration::from_secs(300));

        let thread = thread::spawn(move || reconciler.run());
        drop(commands);

        assert!(thread.join().unwrap().is_ok());
    }

    fn keys(root: &Path) -> DestinationKeys {
        let metadata = CommonMetadata {
            hostname: "host".to_string(),
            instance_id: "i-1".to_string(),
            ..CommonMetadata::default()
        };
        DestinationKeys::new(root, &metadata)
    }

    #[test]
    fn test_dirs_added_after_startup_are_queued_for_expansion() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("ks/t1/backups")).unwrap();

        let set = WatchSet::new(SharedBackend::default(), UploadFilter::new(root));
        let (tasks_tx, tasks_rx) = crossbeam_channel::unbounded();
        let (reconciler, commands) = Reconciler::new(set, Duration::from_secs(300));
        let handle = reconciler
            .with_uploads(tasks_tx, keys(root))
            .spawn(commands)
            .unwrap();
        handle.snapshot().unwrap();

        // Directories present at startup are not re-shipped
        assert!(tasks_rx.try_recv().is_err());

        let snapshots = root.join("ks/t2/snapshots");
        fs::create_dir_all(snapshots.join("1700000000")).unwrap();
        fs::write(snapshots.join("1700000000/mc-1-big-Data.db"), b"x").unwrap();
        handle.rescan().unwrap();
        handle.snapshot().unwrap();

        let task = tasks_rx.try_recv().unwrap();
        assert_eq!(task.path, snapshots);
        assert_eq!(task.target, Target::Directory);
        assert_eq!(task.destination_key, "host-i-1/ks/t2/snapshots");
        assert!(tasks_rx.try_recv().is_err());

        handle.shutdown().unwrap();
    }

    #[test]
    fn test_closed_upload_queue_does_not_stop_the_loop() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let set = WatchSet::new(SharedBackend::default(), UploadFilter::new(root));
        let (tasks_tx, tasks_rx) = crossbeam_channel::unbounded();
        drop(tasks_rx);
        let (reconciler, commands) = Reconciler::new(set, Duration::from_secs(300));
        let handle = reconciler
            .with_uploads(tasks_tx, keys(root))
            .spawn(commands)
            .unwrap();

        fs::create_dir_all(root.join("ks/t/backups")).unwrap();
        handle.rescan().unwrap();

        assert_eq!(handle.snapshot().unwrap(), vec![root.join("ks/t/backups")]);
        handle.shutdown().unwrap();
    }

    /// Refuses every registration
    #[derive(Default)]
    struct DeniedBackend;

    impl WatchBackend for DeniedBackend {
        fn watch(&mut self, _path: &Path) -> notify::Result<()> {
            Err(notify::Error::io(io::Error::from(io::ErrorKind::PermissionDenied)))
        }

        fn unwatch(&mut self, _path: &Path) -> notify::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fatal_registration_error_ends_the_loop() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let backups = root.join("ks/t/backups");
        fs::create_dir_all(&backups).unwrap();

        let set = WatchSet::new(DeniedBackend, UploadFilter::new(root));
        let (reconciler, commands) = Reconciler::new(set, Duration::from_secs(300));
        let handle = reconciler.spawn(commands).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_finished());
        assert!(matches!(handle.snapshot(), Err(WatchError::Disconnected)));

        match handle.shutdown() {
            Err(WatchError::Register { path, .. }) => assert_eq!(path, backups),
            other => panic!("expected a registration error, got {:?}", other),
        }
    }
}
