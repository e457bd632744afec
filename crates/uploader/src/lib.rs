//! Upload dispatch for Snapship
//!
//! This crate provides:
//! - The [`Uploader`] capability, chosen once at startup from the resolved cloud
//! - Object store uploaders for S3 and GCS
//! - A bounded task queue drained by a fixed pool of worker threads

pub mod dispatch;
pub mod object_store;

pub use dispatch::{DispatchConfig, DispatchError, DispatchStats, Dispatcher};
pub use object_store::ObjectStoreUploader;

use snapship_core::Cloud;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Upload errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object store rejected {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: opendal::Error,
    },

    #[error("failed to configure object store: {0}")]
    Config(#[source] opendal::Error),

    /// No destination is available (cloud provider unknown)
    #[error("no upload destination: {0}")]
    Unavailable(String),
}

/// Transfers one local file to remote storage
pub trait Uploader: Send + Sync {
    /// Upload `path` under `key`, returning the object's location
    fn upload(&self, path: &Path, key: &str) -> Result<String, UploadError>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Uploader used when no cloud provider was resolved; every attempt is skipped
#[derive(Debug, Clone)]
pub struct UnavailableUploader {
    reason: String,
}

impl UnavailableUploader {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Uploader for UnavailableUploader {
    fn upload(&self, _path: &Path, _key: &str) -> Result<String, UploadError> {
        Err(UploadError::Unavailable(self.reason.clone()))
    }

    fn describe(&self) -> String {
        format!("unavailable ({})", self.reason)
    }
}

/// Pick the uploader for the resolved cloud provider
pub fn for_cloud(
    cloud: Cloud,
    bucket: &str,
    region: &str,
    handle: Handle,
) -> Result<Arc<dyn Uploader>, UploadError> {
    let uploader: Arc<dyn Uploader> = match cloud {
        Cloud::Aws => Arc::new(ObjectStoreUploader::s3(bucket, region, handle)?),
        Cloud::Gce => Arc::new(ObjectStoreUploader::gcs(bucket, handle)?),
        Cloud::None => Arc::new(UnavailableUploader::new("cloud provider unknown")),
    };
    Ok(uploader)
}
