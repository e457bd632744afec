//! Concurrent provider detection
//!
//! Both probes start together; the first one to succeed wins. Probes that fail
//! simply drop out. If nothing succeeds before the timeout the result is an
//! unresolved record (`cloud = none`), which callers may treat as fatal or not.

use crate::{aws, gce, ProbeError};
use reqwest::Client;
use snapship_core::CommonMetadata;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Metadata service base URLs
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub aws: String,
    pub gce: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            aws: aws::DEFAULT_BASE_URL.to_string(),
            gce: gce::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Resolves the execution environment at startup
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    client: Client,
    endpoints: Endpoints,
    pod_name: String,
}

impl IdentityResolver {
    /// Create a resolver whose individual requests never outlive `timeout`
    pub fn new(
        endpoints: Endpoints,
        pod_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(ProbeError::Client)?;

        Ok(Self {
            client,
            endpoints,
            pod_name: pod_name.into(),
        })
    }

    /// Probe both providers and return the first successful answer
    pub async fn resolve(&self, timeout: Duration) -> CommonMetadata {
        let mut probes = JoinSet::new();
        probes.spawn(aws::probe(
            self.client.clone(),
            self.endpoints.aws.clone(),
            self.pod_name.clone(),
        ));
        probes.spawn(gce::probe(
            self.client.clone(),
            self.endpoints.gce.clone(),
            self.pod_name.clone(),
        ));

        let first = tokio::time::timeout(timeout, async {
            while let Some(joined) = probes.join_next().await {
                match joined {
                    Ok(Ok(metadata)) => return Some(metadata),
                    Ok(Err(e)) => debug!("Metadata probe failed: {}", e),
                    Err(e) => warn!("Metadata probe task aborted: {}", e),
                }
            }
            None
        })
        .await;

        // Losing probes are cancelled when the set drops
        probes.abort_all();

        match first {
            Ok(Some(metadata)) => {
                info!(cloud = %metadata.cloud, region = %metadata.region, "Resolved cloud identity");
                metadata
            }
            Ok(None) => {
                warn!("Unable to determine cloud provider (checked AWS and GCE)");
                CommonMetadata::unknown(self.pod_name.clone())
            }
            Err(_) => {
                warn!(
                    "Unable to determine cloud provider within {:?} (checked AWS and GCE)",
                    timeout
                );
                CommonMetadata::unknown(self.pod_name.clone())
            }
        }
    }
}
