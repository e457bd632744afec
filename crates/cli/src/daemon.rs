//! Daemon lifecycle
//!
//! Wires the pipeline together:
//!
//! ```text
//! notify ─raw─▶ event pump ─tasks─▶ upload workers
//!                   │
//!                   └─commands─▶ rescan loop (owns the watch set)
//!                                      │
//!                                      └─new directories─▶ upload workers
//! ```
//!
//! Shutdown runs in the same direction: stopping the rescan loop drops the
//! notify watcher, which closes the raw channel, which stops the pump, which
//! closes the upload queue once the workers have drained it.

use crate::config::Config;
use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use snapship_core::{CommonMetadata, DestinationKeys};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};
use uploader::{DispatchStats, Dispatcher, Uploader};
use watcher::platform;
use watcher::pump::PumpStats;
use watcher::{Classifier, EventPump, Reconciler, WatchError, WatchHandle, WatchSet};

/// Raw notification buffer between the notify thread and the pump
const RAW_EVENT_CAPACITY: usize = 4096;

/// Running daemon
pub struct Daemon {
    watch: WatchHandle,
    pump: JoinHandle<PumpStats>,
    dispatcher: Dispatcher,
}

/// Final counters, reported on shutdown
#[derive(Debug)]
pub struct DaemonReport {
    pub pump: PumpStats,
    pub uploads: Arc<DispatchStats>,
}

impl Daemon {
    /// Start the upload workers, the rescan loop and the event pump
    pub fn start(
        config: &Config,
        metadata: &CommonMetadata,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self> {
        let filter = config.build_filter()?;
        let keys = DestinationKeys::new(&config.root, metadata);

        let dispatcher = Dispatcher::start(
            config.dispatch_config(),
            uploader,
            filter.clone(),
            keys.clone(),
        )
        .context("Failed to start upload workers")?;

        let (raw_tx, raw_rx) = bounded(RAW_EVENT_CAPACITY);
        let backend = platform::recommended_watcher(raw_tx)?;
        let watch_set = WatchSet::new(backend, filter.clone());

        let (reconciler, commands) = Reconciler::new(watch_set, config.rescan_interval());
        let watch = reconciler
            .with_uploads(dispatcher.sender(), keys.clone())
            .spawn(commands.clone())?;

        let pump = EventPump::new(
            raw_rx,
            Classifier::new(filter, keys),
            commands,
            dispatcher.sender(),
        )
        .spawn()?;

        info!("Watching {} for backup files", config.root.display());

        Ok(Self {
            watch,
            pump,
            dispatcher,
        })
    }

    /// Directories currently watched
    pub fn watched(&self) -> Result<Vec<PathBuf>, WatchError> {
        self.watch.snapshot()
    }

    /// Trigger a rescan without waiting for the next interval
    pub fn rescan(&self) -> Result<(), WatchError> {
        self.watch.rescan()
    }

    /// Whether the rescan loop has stopped on its own (fatal watch error)
    pub fn has_failed(&self) -> bool {
        self.watch.is_finished()
    }

    /// Stop every thread, draining queued uploads first.
    ///
    /// Returns the fatal watch error if the rescan loop died before shutdown.
    pub fn shutdown(self) -> Result<DaemonReport> {
        let watch_result = self.watch.shutdown();

        let pump = match self.pump.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("Event pump panicked");
                PumpStats::default()
            }
        };
        let uploads = self.dispatcher.shutdown();

        watch_result.context("File watching failed")?;
        info!("Daemon stopped");
        Ok(DaemonReport { pump, uploads })
    }
}
