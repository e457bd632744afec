//! Raw event pump
//!
//! Blocks on the backend's raw event channel, translates and classifies each
//! event, forwards deletions and overflow to the watch-set owner, and submits
//! upload tasks. Submitting blocks while the upload queue is full, which in
//! turn throttles the notification backend.

use crate::classify::Classifier;
use crate::platform::{self, RawEvent};
use crate::reconcile::WatchCommand;
use crate::WatchError;
use crossbeam_channel::{Receiver, Sender};
use snapship_core::UploadTask;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Counters reported when the pump stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub events: u64,
    pub tasks: u64,
    pub deletions: u64,
}

/// Moves events from the notification backend to the upload queue
pub struct EventPump {
    raw: Receiver<RawEvent>,
    classifier: Classifier,
    commands: Sender<WatchCommand>,
    tasks: Sender<UploadTask>,
}

impl EventPump {
    pub fn new(
        raw: Receiver<RawEvent>,
        classifier: Classifier,
        commands: Sender<WatchCommand>,
        tasks: Sender<UploadTask>,
    ) -> Self {
        Self {
            raw,
            classifier,
            commands,
            tasks,
        }
    }

    /// Run until the backend closes the raw channel or the upload queue closes
    pub fn run(self) -> PumpStats {
        let mut stats = PumpStats::default();

        for raw in self.raw.iter() {
            let event = match raw {
                Ok(event) => event,
                Err(e) => {
                    warn!("File watcher error: {}", e);
                    continue;
                }
            };

            let translated = platform::translate(&event);
            if translated.rescan {
                warn!("Events may have been dropped by the backend, requesting a rescan");
                let _ = self.commands.send(WatchCommand::Rescan);
            }

            for fs_event in translated.events {
                stats.events += 1;

                if fs_event.kind.is_delete() {
                    stats.deletions += 1;
                    let _ = self.commands.send(WatchCommand::Forget(fs_event.path));
                    continue;
                }

                if !fs_event.kind.is_registered() {
                    trace!("Ignoring {:?} on {}", fs_event.kind, fs_event.path.display());
                    continue;
                }

                if let Some(task) = self.classifier.classify(&fs_event) {
                    debug!("Queueing upload of {}", task.path.display());
                    if self.tasks.send(task).is_err() {
                        warn!("Upload queue closed, stopping event pump");
                        return stats;
                    }
                    stats.tasks += 1;
                }
            }
        }

        info!(
            "Event pump stopped ({} events, {} tasks queued)",
            stats.events, stats.tasks
        );
        stats
    }

    /// Run the pump on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<PumpStats>, WatchError> {
        thread::Builder::new()
            .name("snapship-pump".to_string())
            .spawn(move || self.run())
            .map_err(|source| WatchError::Spawn {
                name: "pump",
                source,
            })
    }
}
