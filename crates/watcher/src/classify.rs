//! Event classification
//!
//! Turns a surviving file system event into at most one upload task. The
//! decision depends only on the path and the live file system state at
//! classification time; the backend's directory hint is never trusted.

use crate::FileSystemEvent;
use snapship_core::{DestinationKeys, UploadFilter, UploadTask};
use std::fs;
use tracing::trace;

/// Classifies events into upload tasks
#[derive(Debug, Clone)]
pub struct Classifier {
    filter: UploadFilter,
    keys: DestinationKeys,
}

impl Classifier {
    pub fn new(filter: UploadFilter, keys: DestinationKeys) -> Self {
        Self { filter, keys }
    }

    /// Classify one event
    pub fn classify(&self, event: &FileSystemEvent) -> Option<UploadTask> {
        // Deletions belong to the watch-set owner
        if event.kind.is_delete() {
            return None;
        }

        let path = &event.path;
        if self.filter.is_reserved(path) {
            trace!("Reserved path, skipping: {}", path.display());
            return None;
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                trace!("Path gone before classification: {} ({})", path.display(), e);
                return None;
            }
        };

        if metadata.is_dir() {
            if self.filter.is_excluded(path, true) {
                return None;
            }
            let key = self.keys.key_for(path)?;
            return Some(UploadTask::directory(path.clone(), key));
        }

        if metadata.is_file() && self.filter.should_upload_file(path) {
            let key = self.keys.key_for(path)?;
            return Some(UploadTask::file(path.clone(), key));
        }

        trace!("Not uploadable: {}", path.display());
        None
    }

    pub fn filter(&self) -> &UploadFilter {
        &self.filter
    }

    pub fn keys(&self) -> &DestinationKeys {
        &self.keys
    }
}
