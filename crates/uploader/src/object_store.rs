//! Object store uploaders (S3, GCS) backed by opendal
//!
//! opendal is async; workers are plain OS threads, so each upload is driven to
//! completion on the shared tokio runtime with `Handle::block_on`. Files are
//! streamed in chunks rather than read into memory, since sstables can be large.

use crate::{UploadError, Uploader};
use opendal::{services, Operator};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;

/// Multipart chunk size
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Uploads files into a bucket through an opendal operator
pub struct ObjectStoreUploader {
    operator: Operator,
    handle: Handle,
    scheme: &'static str,
    bucket: String,
}

impl ObjectStoreUploader {
    /// S3 bucket in `region`; credentials come from the environment or instance profile
    pub fn s3(bucket: &str, region: &str, handle: Handle) -> Result<Self, UploadError> {
        let builder = services::S3::default().bucket(bucket).region(region);
        let operator = Operator::new(builder).map_err(UploadError::Config)?.finish();
        Ok(Self::from_operator(operator, handle, "s3", bucket))
    }

    /// GCS bucket; credentials come from the environment or the VM service account
    pub fn gcs(bucket: &str, handle: Handle) -> Result<Self, UploadError> {
        let builder = services::Gcs::default().bucket(bucket);
        let operator = Operator::new(builder).map_err(UploadError::Config)?.finish();
        Ok(Self::from_operator(operator, handle, "gs", bucket))
    }

    /// Wrap an already configured operator
    pub fn from_operator(
        operator: Operator,
        handle: Handle,
        scheme: &'static str,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            operator,
            handle,
            scheme,
            bucket: bucket.into(),
        }
    }

    async fn transfer(&self, path: &Path, key: &str) -> Result<(), UploadError> {
        let io_error = |source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let store_error = |source| UploadError::Store {
            key: key.to_string(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let mut writer = self
            .operator
            .writer_with(key)
            .chunk(CHUNK_SIZE)
            .await
            .map_err(store_error)?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await.map_err(io_error)?;
            if n == 0 {
                break;
            }
            writer.write(buf[..n].to_vec()).await.map_err(store_error)?;
        }

        writer.close().await.map_err(store_error)?;
        Ok(())
    }
}

impl Uploader for ObjectStoreUploader {
    fn upload(&self, path: &Path, key: &str) -> Result<String, UploadError> {
        self.handle.block_on(self.transfer(path, key))?;
        Ok(format!("{}://{}/{}", self.scheme, self.bucket, key))
    }

    fn describe(&self) -> String {
        format!("{}://{}", self.scheme, self.bucket)
    }
}
