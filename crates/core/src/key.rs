//! Destination key construction
//!
//! Keys have the form `{hostname}-{instanceId}/{path relative to root}` and are
//! a pure function of the path and the identity metadata, so uploading the same
//! file twice always targets the same object.

use crate::metadata::CommonMetadata;
use std::path::{Component, Path, PathBuf};

/// Builds destination keys for files under a watched root
#[derive(Debug, Clone)]
pub struct DestinationKeys {
    root: PathBuf,
    prefix: String,
}

impl DestinationKeys {
    pub fn new(root: impl Into<PathBuf>, metadata: &CommonMetadata) -> Self {
        Self {
            root: root.into(),
            prefix: format!("{}-{}", metadata.hostname, metadata.instance_id),
        }
    }

    /// Key for `path`, or `None` when the path is not beneath the root
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;

        let mut key = self.prefix.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    key.push('/');
                    key.push_str(&part.to_string_lossy());
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `{hostname}-{instanceId}` prefix shared by every key
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Cloud;

    fn metadata() -> CommonMetadata {
        CommonMetadata {
            cloud: Cloud::Aws,
            hostname: "ip-10-0-0-1".to_string(),
            instance_id: "i-0abc".to_string(),
            ..CommonMetadata::default()
        }
    }

    #[test]
    fn test_key_is_prefix_plus_relative_path() {
        let keys = DestinationKeys::new("/data", &metadata());
        let key = keys.key_for(Path::new("/data/ks1/t1/snapshots/2024/sstable.db"));
        assert_eq!(
            key.as_deref(),
            Some("ip-10-0-0-1-i-0abc/ks1/t1/snapshots/2024/sstable.db")
        );
    }

    #[test]
    fn test_key_is_deterministic() {
        let keys = DestinationKeys::new("/data", &metadata());
        let path = Path::new("/data/ks1/t1/backups/a.db");
        assert_eq!(keys.key_for(path), keys.key_for(path));

        let rebuilt = DestinationKeys::new("/data", &metadata());
        assert_eq!(keys.key_for(path), rebuilt.key_for(path));
    }

    #[test]
    fn test_paths_outside_root_have_no_key() {
        let keys = DestinationKeys::new("/data", &metadata());
        assert_eq!(keys.key_for(Path::new("/etc/passwd")), None);
        assert_eq!(keys.key_for(Path::new("/data/../etc/passwd")), None);
    }

    #[test]
    fn test_unknown_identity_still_builds_keys() {
        let keys = DestinationKeys::new("/data", &CommonMetadata::default());
        assert_eq!(keys.prefix(), "-");
        assert_eq!(
            keys.key_for(Path::new("/data/x/backups/y.db")).as_deref(),
            Some("-/x/backups/y.db")
        );
    }
}
