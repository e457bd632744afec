//! Common utilities for integration tests

use cli_lib::{Config, Daemon};
use clap::Parser;
use parking_lot::Mutex;
use snapship_core::CommonMetadata;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uploader::{UploadError, Uploader};

/// Uploader that records every call instead of talking to a bucket
#[derive(Default)]
pub struct RecordingUploader {
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingUploader {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.calls.lock().iter().map(|(_, key)| key.clone()).collect();
        keys.sort();
        keys
    }

    pub fn count(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|(_, k)| k == key).count()
    }
}

impl Uploader for RecordingUploader {
    fn upload(&self, path: &Path, key: &str) -> Result<String, UploadError> {
        self.calls.lock().push((path.to_path_buf(), key.to_string()));
        Ok(format!("mem://{}", key))
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// A data directory with a running daemon on top of it
pub struct TestDaemon {
    pub daemon: Daemon,
    pub uploader: Arc<RecordingUploader>,
    /// Watched root
    pub root: PathBuf,
    /// Scratch space on the same file system, outside the root
    pub staging: PathBuf,
    _temp: TempDir,
}

impl TestDaemon {
    /// Start a daemon over a root prepared by `setup`.
    ///
    /// Returns once the initial rescan has completed.
    pub fn start(setup: impl FnOnce(&Path)) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("data");
        let staging = temp.path().join("staging");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&staging).unwrap();
        setup(&root);

        let config = Config::try_parse_from([
            "snapship",
            "--bucket",
            "backups",
            "--root",
            root.to_str().unwrap(),
            "--rescan-interval-secs",
            "1",
            "--settle-delay-secs",
            "0",
        ])
        .unwrap();

        let metadata = CommonMetadata {
            hostname: "node-1".to_string(),
            instance_id: "i-0abc".to_string(),
            ..CommonMetadata::default()
        };

        let uploader = Arc::new(RecordingUploader::default());
        let daemon = Daemon::start(&config, &metadata, uploader.clone()).unwrap();
        // Answered only after the initial rescan has registered every watch
        daemon.watched().unwrap();

        Self {
            daemon,
            uploader,
            root,
            staging,
            _temp: temp,
        }
    }

    /// Watch set as seen by its owner; the initial rescan has completed
    pub fn watched(&self) -> Vec<PathBuf> {
        self.daemon.watched().unwrap()
    }
}

/// Poll `condition` until it holds or the deadline passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

/// Write `path` in the staging area, then rename it into place
pub fn write_and_rename(staging: &Path, path: &Path, contents: &[u8]) {
    let name = path.file_name().unwrap();
    let staged = staging.join(name);
    fs::write(&staged, contents).unwrap();
    fs::rename(&staged, path).unwrap();
}
