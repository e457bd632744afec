//! Notification boundary
//!
//! Raw notify events are translated here, once, into [`FileSystemEvent`]s.
//! Nothing downstream looks at notify's event kinds or inotify bits.

use crate::{FileSystemEvent, FsEventKind, WatchError};
use crossbeam_channel::Sender;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, Watcher};

/// Raw backend output as delivered by the notify handler
pub type RawEvent = notify::Result<Event>;

/// Result of translating one raw event
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Translated {
    pub events: Vec<FileSystemEvent>,
    /// The backend dropped events (queue overflow); a full rescan is needed
    pub rescan: bool,
}

/// Create the platform watcher, forwarding raw events into `raw_tx`
pub fn recommended_watcher(raw_tx: Sender<RawEvent>) -> Result<RecommendedWatcher, WatchError> {
    let handler = move |res: RawEvent| {
        // Receiver gone means the pump stopped; nothing left to deliver to
        let _ = raw_tx.send(res);
    };

    RecommendedWatcher::new(handler, Config::default()).map_err(WatchError::Init)
}

/// Translate a notify event into zero or more file system events
pub fn translate(event: &Event) -> Translated {
    let mut translated = Translated {
        events: Vec::new(),
        rescan: event.need_rescan(),
    };

    let (kind, is_dir_hint) = match event.kind {
        EventKind::Create(create) => (FsEventKind::Created, create == CreateKind::Folder),
        // `Both` duplicates the `To` half that inotify already reported
        EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => (FsEventKind::MovedIn, false),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => (FsEventKind::Deleted, false),
        EventKind::Modify(ModifyKind::Name(_)) => return translated,
        EventKind::Modify(_) => (FsEventKind::Modified, false),
        EventKind::Remove(RemoveKind::Folder) => (FsEventKind::SelfDeleted, true),
        EventKind::Remove(_) => (FsEventKind::Deleted, false),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return translated,
    };

    translated.events = event
        .paths
        .iter()
        .map(|path| FileSystemEvent {
            path: path.clone(),
            kind,
            is_dir_hint,
        })
        .collect();
    translated
}
