//! Upload tasks handed from the classifier to the dispatcher

use std::path::PathBuf;

/// What an upload task points at, decided by a live stat at classification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A single file, uploaded directly
    File,
    /// A directory, expanded by a worker into its files
    Directory,
}

/// A unit of work for the upload dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    /// Absolute path of the file or directory
    pub path: PathBuf,
    /// Destination key (for directories, the key prefix of its contents)
    pub destination_key: String,
    /// File or directory
    pub target: Target,
}

impl UploadTask {
    pub fn file(path: impl Into<PathBuf>, destination_key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            destination_key: destination_key.into(),
            target: Target::File,
        }
    }

    pub fn directory(path: impl Into<PathBuf>, destination_key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            destination_key: destination_key.into(),
            target: Target::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.target == Target::Directory
    }
}
