//! Bounded upload queue and worker pool
//!
//! Workers pull one task at a time. File tasks are uploaded directly;
//! directory tasks wait out a settle delay (the upstream writer may still be
//! adding siblings) and then upload every matching file beneath them.
//! Failed uploads are logged and dropped; retrying is the uploader's business.

use crate::{UploadError, Uploader};
use crossbeam_channel::{bounded, Receiver, Sender};
use snapship_core::{DestinationKeys, UploadFilter, UploadTask};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker threads (default: 2)
    pub workers: usize,
    /// Queue bound (default: 10,000)
    pub queue_capacity: usize,
    /// Pause before walking a new directory (default: 5s)
    pub settle_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 10_000,
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// Dispatcher errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("failed to spawn upload worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Every worker has exited
    #[error("upload queue is closed")]
    Closed,
}

/// Upload counters shared by all workers
#[derive(Debug, Default)]
pub struct DispatchStats {
    uploaded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl DispatchStats {
    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Bounded queue plus worker pool
pub struct Dispatcher {
    tx: Sender<UploadTask>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Start the worker pool
    pub fn start(
        config: DispatchConfig,
        uploader: Arc<dyn Uploader>,
        filter: UploadFilter,
        keys: DestinationKeys,
    ) -> Result<Self, DispatchError> {
        if config.workers == 0 {
            return Err(DispatchError::NoWorkers);
        }

        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let stats = Arc::new(DispatchStats::default());

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let worker = Worker {
                id,
                rx: rx.clone(),
                uploader: Arc::clone(&uploader),
                filter: filter.clone(),
                keys: keys.clone(),
                settle_delay: config.settle_delay,
                stats: Arc::clone(&stats),
            };
            let handle = thread::Builder::new()
                .name(format!("snapship-upload-{}", id))
                .spawn(move || worker.run())
                .map_err(DispatchError::Spawn)?;
            workers.push(handle);
        }

        info!(
            "Started {} upload workers (queue capacity {}, uploader {})",
            config.workers,
            config.queue_capacity,
            uploader.describe()
        );

        Ok(Self { tx, workers, stats })
    }

    /// Producer handle; sending blocks while the queue is full
    pub fn sender(&self) -> Sender<UploadTask> {
        self.tx.clone()
    }

    /// Queue a task, blocking while the queue is full
    pub fn submit(&self, task: UploadTask) -> Result<(), DispatchError> {
        self.tx.send(task).map_err(|_| DispatchError::Closed)
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Close the queue and wait for the workers to drain it.
    ///
    /// Workers only stop once every sender handed out by [`Dispatcher::sender`]
    /// has been dropped too.
    pub fn shutdown(self) -> Arc<DispatchStats> {
        drop(self.tx);
        for worker in self.workers {
            if worker.join().is_err() {
                error!("Upload worker panicked");
            }
        }

        info!(
            "Upload workers stopped ({} uploaded, {} failed, {} skipped)",
            self.stats.uploaded(),
            self.stats.failed(),
            self.stats.skipped()
        );
        self.stats
    }
}

struct Worker {
    id: usize,
    rx: Receiver<UploadTask>,
    uploader: Arc<dyn Uploader>,
    filter: UploadFilter,
    keys: DestinationKeys,
    settle_delay: Duration,
    stats: Arc<DispatchStats>,
}

impl Worker {
    fn run(self) {
        debug!("Upload worker {} started", self.id);
        for task in self.rx.iter() {
            if task.is_directory() {
                self.expand(&task.path);
            } else {
                self.upload(&task.path, &task.destination_key);
            }
        }
        debug!("Upload worker {} stopped", self.id);
    }

    /// Upload every matching file beneath `dir`
    fn expand(&self, dir: &Path) {
        if !self.settle_delay.is_zero() {
            debug!("Waiting {:?} for {} to settle", self.settle_delay, dir.display());
            thread::sleep(self.settle_delay);
        }

        let filter = &self.filter;
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && filter.is_excluded(e.path(), true)));

        let mut count = 0usize;
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Could not read entry under {}: {}", dir.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !filter.should_upload_file(entry.path()) {
                continue;
            }

            match self.keys.key_for(entry.path()) {
                Some(key) => {
                    self.upload(entry.path(), &key);
                    count += 1;
                }
                None => warn!("{} is outside the watched root", entry.path().display()),
            }
        }

        debug!("Expanded {} into {} uploads", dir.display(), count);
    }

    fn upload(&self, path: &Path, key: &str) {
        match self.uploader.upload(path, key) {
            Ok(location) => {
                self.stats.uploaded.fetch_add(1, Ordering::Relaxed);
                info!("Uploaded {} to {}", path.display(), location);
            }
            Err(UploadError::Unavailable(reason)) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping upload of {}: {}", path.display(), reason);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("Upload of {} failed (not retried): {}", path.display(), e);
            }
        }
    }
}
