//! Upload filter for snapship
//!
//! Decides which directories are worth watching and which files are worth
//! uploading. Rules, in order of precedence:
//! 1. Paths outside the root are never uploaded
//! 2. Reserved subtree: anything containing `/system` beneath the root
//! 3. Operator exclusion patterns (gitignore syntax, optional)
//! 4. File names: must carry the upload suffix and must not be a transient marker

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

/// Directory base names produced by the upstream data store
pub const BACKUP_DIR_NAMES: [&str; 2] = ["backups", "snapshots"];

/// Reserved/internal subtree marker
pub const RESERVED_SUBTREE: &str = "/system";

/// Default accepted file suffix
pub const DEFAULT_UPLOAD_SUFFIX: &str = ".db";

/// Filter construction errors
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid exclusion pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: ignore::Error,
    },
}

/// Upload filter rooted at the watched data directory
#[derive(Debug, Clone)]
pub struct UploadFilter {
    /// Watched root directory
    root: PathBuf,

    /// Accepted file suffix (default: `.db`)
    suffix: String,

    /// Operator exclusion patterns (optional)
    excludes: Option<Gitignore>,
}

impl UploadFilter {
    /// Filter with the default suffix and no extra exclusions
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            suffix: DEFAULT_UPLOAD_SUFFIX.to_string(),
            excludes: None,
        }
    }

    /// Replace the accepted file suffix
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Add gitignore-style exclusion patterns, matched relative to the root
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GitignoreBuilder::new(&self.root);
        let mut any = false;

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            builder
                .add_line(None, pattern)
                .map_err(|source| FilterError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            any = true;
        }

        self.excludes = if any {
            Some(builder.build().map_err(|source| FilterError::Pattern {
                pattern: "<set>".to_string(),
                source,
            })?)
        } else {
            None
        };
        Ok(self)
    }

    /// Whether a directory's base name marks it as a backup/snapshot directory.
    ///
    /// Exact, case-sensitive match: `snapshots` qualifies, `snapshots_old` does not.
    pub fn is_backup_dir_name(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| BACKUP_DIR_NAMES.contains(&name))
            .unwrap_or(false)
    }

    /// Whether `path` lies in the reserved subtree beneath the root
    pub fn is_reserved(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) => {
                let relative = format!("/{}", relative.to_string_lossy());
                relative.contains(RESERVED_SUBTREE)
            }
            Err(_) => false,
        }
    }

    /// Whether `path` must never be watched or uploaded
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        let relative = match path.strip_prefix(&self.root) {
            Ok(relative) => relative,
            Err(_) => return true,
        };

        if self.is_reserved(path) {
            return true;
        }

        if let Some(ref excludes) = self.excludes {
            if !relative.as_os_str().is_empty()
                && excludes
                    .matched_path_or_any_parents(relative, is_dir)
                    .is_ignore()
            {
                return true;
            }
        }

        false
    }

    /// Whether a directory should be registered for notification
    pub fn should_watch_dir(&self, path: &Path) -> bool {
        Self::is_backup_dir_name(path) && !self.is_excluded(path, true)
    }

    /// Whether a file name is a transient marker (`tmp.db` / `*.tmp.db`)
    pub fn is_transient_marker(&self, name: &str) -> bool {
        name == format!("tmp{}", self.suffix) || name.ends_with(&format!(".tmp{}", self.suffix))
    }

    /// Whether a file name is accepted for upload
    pub fn accepts_file_name(&self, name: &str) -> bool {
        name.len() > self.suffix.len()
            && name.ends_with(&self.suffix)
            && !self.is_transient_marker(name)
    }

    /// Whether a regular file at `path` should be uploaded
    pub fn should_upload_file(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };

        self.accepts_file_name(name) && !self.is_excluded(path, false)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}
