//! Daemon configuration
//!
//! Every setting can come from a flag or from the environment, which is how
//! the daemon is configured when it runs as a sidecar.

use clap::Parser;
use snapship_core::{CommonMetadata, FilterError, UploadFilter};
use std::path::PathBuf;
use std::time::Duration;
use uploader::DispatchConfig;

/// Region used when neither the operator nor the metadata service names one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to determine bucket name. Make sure BUCKET_NAME environment variable is set.")]
    MissingBucket,

    #[error(transparent)]
    InvalidExclude(#[from] FilterError),
}

/// Snapship - ships database backup files to object storage
#[derive(Debug, Clone, Parser)]
#[command(name = "snapship")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Destination bucket (mandatory)
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket: Option<String>,

    /// Destination region (default: resolved region, then us-east-1)
    #[arg(long, env = "REGION")]
    pub region: Option<String>,

    /// Data directory to watch
    #[arg(long, env = "SNAPSHIP_ROOT", default_value = "/data")]
    pub root: PathBuf,

    /// Seconds between full rescans of the data directory
    #[arg(long, env = "RESCAN_INTERVAL_SECS", default_value_t = 300)]
    pub rescan_interval_secs: u64,

    /// Upload worker threads
    #[arg(long, env = "UPLOAD_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Maximum queued upload tasks before event intake blocks
    #[arg(long, env = "UPLOAD_QUEUE_CAPACITY", default_value_t = 10_000)]
    pub queue_capacity: usize,

    /// Seconds to wait before uploading the contents of a new directory
    #[arg(long, env = "SETTLE_DELAY_SECS", default_value_t = 5)]
    pub settle_delay_secs: u64,

    /// Budget for cloud identity resolution, in milliseconds
    #[arg(long, env = "IDENTITY_TIMEOUT_MS", default_value_t = 1000)]
    pub identity_timeout_ms: u64,

    /// Accepted file suffix
    #[arg(long, env = "UPLOAD_SUFFIX", default_value = ".db")]
    pub upload_suffix: String,

    /// Extra exclusion patterns (gitignore syntax, relative to the root)
    #[arg(long, env = "EXCLUDE_PATTERNS", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Pod name recorded in the identity metadata
    #[arg(long, env = "K8S_POD_NAME", default_value = "")]
    pub pod_name: String,

    /// Exit when no cloud provider can be resolved
    #[arg(long, env = "REQUIRE_CLOUD")]
    pub require_cloud: bool,
}

impl Config {
    /// The destination bucket; an unset or blank bucket is fatal
    pub fn bucket(&self) -> Result<&str, ConfigError> {
        match self.bucket.as_deref().map(str::trim) {
            Some(bucket) if !bucket.is_empty() => Ok(bucket),
            _ => Err(ConfigError::MissingBucket),
        }
    }

    /// Region for the object store client
    pub fn effective_region(&self, metadata: &CommonMetadata) -> String {
        [self.region.as_deref(), Some(metadata.region.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|region| !region.is_empty())
            .unwrap_or(DEFAULT_REGION)
            .to_string()
    }

    /// Upload filter for the configured root, suffix and exclusions
    pub fn build_filter(&self) -> Result<UploadFilter, ConfigError> {
        let filter = UploadFilter::new(&self.root)
            .with_suffix(&self.upload_suffix)
            .with_excludes(&self.exclude)?;
        Ok(filter)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            settle_delay: Duration::from_secs(self.settle_delay_secs),
        }
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs.max(1))
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }
}
