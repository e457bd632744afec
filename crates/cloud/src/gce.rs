//! GCE metadata server probe

use crate::ProbeError;
use reqwest::Client;
use snapship_core::{Cloud, CommonMetadata};

pub const DEFAULT_BASE_URL: &str = "http://metadata.google.internal";

const INSTANCE_PATH: &str = "/computeMetadata/v1/instance";
const FLAVOR_HEADER: &str = "Metadata-Flavor";
const FLAVOR: &str = "Google";

/// Probe the GCE metadata server at `base_url`.
///
/// Succeeds only if the server identifies itself and returns the instance id.
pub async fn probe(
    client: Client,
    base_url: String,
    pod_name: String,
) -> Result<CommonMetadata, ProbeError> {
    let instance_id = get(&client, &base_url, "id").await?;

    // Zone comes back as `projects/<number>/zones/<zone>`
    let zone = get(&client, &base_url, "zone")
        .await
        .map(|zone| zone.rsplit('/').next().unwrap_or_default().to_string())
        .unwrap_or_default();
    let hostname = get(&client, &base_url, "hostname")
        .await
        .unwrap_or_default();

    Ok(CommonMetadata {
        cloud: Cloud::Gce,
        region: Cloud::Gce.region_from_zone(&zone),
        zone,
        hostname,
        instance_id,
        pod_name,
    })
}

async fn get(client: &Client, base_url: &str, item: &str) -> Result<String, ProbeError> {
    let url = format!("{}{}/{}", base_url, INSTANCE_PATH, item);

    let response = client
        .get(&url)
        .header(FLAVOR_HEADER, FLAVOR)
        .send()
        .await
        .map_err(|source| ProbeError::Http {
            url: url.clone(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(ProbeError::Status {
            url,
            status: response.status().as_u16(),
        });
    }

    let flavored = response
        .headers()
        .get(FLAVOR_HEADER)
        .map(|value| value.as_bytes() == FLAVOR.as_bytes())
        .unwrap_or(false);
    if !flavored {
        return Err(ProbeError::NotGce { url });
    }

    let body = response
        .text()
        .await
        .map_err(|source| ProbeError::Http { url, source })?;
    Ok(body.trim().to_string())
}
