//! AWS EC2 instance metadata probe (IMDSv2 with IMDSv1 fallback)

use crate::ProbeError;
use reqwest::Client;
use snapship_core::{Cloud, CommonMetadata};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://169.254.169.254";

const TOKEN_PATH: &str = "/latest/api/token";
const METADATA_PATH: &str = "/latest/meta-data";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECS: &str = "21600";

/// Probe the EC2 metadata service at `base_url`.
///
/// Succeeds only if the instance id can be read; zone and hostname are best-effort.
pub async fn probe(
    client: Client,
    base_url: String,
    pod_name: String,
) -> Result<CommonMetadata, ProbeError> {
    let token = session_token(&client, &base_url).await;
    let token = token.as_deref();

    let instance_id = get(&client, &base_url, token, "instance-id").await?;
    let zone = get(&client, &base_url, token, "placement/availability-zone")
        .await
        .unwrap_or_default();
    let hostname = get(&client, &base_url, token, "hostname")
        .await
        .unwrap_or_default();

    Ok(CommonMetadata {
        cloud: Cloud::Aws,
        region: Cloud::Aws.region_from_zone(&zone),
        zone,
        hostname,
        instance_id,
        pod_name,
    })
}

async fn session_token(client: &Client, base_url: &str) -> Option<String> {
    let url = format!("{}{}", base_url, TOKEN_PATH);
    let response = match client
        .put(&url)
        .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!("IMDSv2 token request returned {}, using IMDSv1", response.status());
            return None;
        }
        Err(e) => {
            debug!("IMDSv2 token request failed, using IMDSv1: {}", e);
            return None;
        }
    };

    response.text().await.ok().filter(|token| !token.is_empty())
}

async fn get(
    client: &Client,
    base_url: &str,
    token: Option<&str>,
    item: &str,
) -> Result<String, ProbeError> {
    let url = format!("{}{}/{}", base_url, METADATA_PATH, item);

    let mut request = client.get(&url);
    if let Some(token) = token {
        request = request.header(TOKEN_HEADER, token);
    }

    let response = request.send().await.map_err(|source| ProbeError::Http {
        url: url.clone(),
        source,
    })?;

    if !response.status().is_success() {
        return Err(ProbeError::Status {
            url,
            status: response.status().as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|source| ProbeError::Http { url, source })?;
    Ok(body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_probe_with_session_token() {
        let server = MockServer::start_async().await;
        let token = server.mock(|when, then| {
            when.method(PUT)
                .path("/latest/api/token")
                .header("x-aws-ec2-metadata-token-ttl-seconds", "21600");
            then.status(200).body("secret-token");
        });
        let instance = server.mock(|when, then| {
            when.method(GET)
                .path("/latest/meta-data/instance-id")
                .header("x-aws-ec2-metadata-token", "secret-token");
            then.status(200).body("i-0abc123");
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/latest/meta-data/placement/availability-zone")
                .header("x-aws-ec2-metadata-token", "secret-token");
            then.status(200).body("us-east-1a");
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/latest/meta-data/hostname")
                .header("x-aws-ec2-metadata-token", "secret-token");
            then.status(200).body("ip-10-0-0-1.ec2.internal\n");
        });

        let metadata = probe(Client::new(), server.base_url(), "pod-0".to_string())
            .await
            .unwrap();

        token.assert();
        instance.assert();
        assert_eq!(metadata.cloud, Cloud::Aws);
        assert_eq!(metadata.zone, "us-east-1a");
        assert_eq!(metadata.region, "us-east-1");
        assert_eq!(metadata.hostname, "ip-10-0-0-1.ec2.internal");
        assert_eq!(metadata.instance_id, "i-0abc123");
        assert_eq!(metadata.pod_name, "pod-0");
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_imdsv1() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/latest/meta-data/instance-id");
            then.status(200).body("i-legacy");
        });

        let metadata = probe(Client::new(), server.base_url(), String::new())
            .await
            .unwrap();

        assert_eq!(metadata.instance_id, "i-legacy");
        // Optional fields missing on the server stay empty
        assert_eq!(metadata.zone, "");
        assert_eq!(metadata.region, "");
        assert_eq!(metadata.hostname, "");
    }

    #[tokio::test]
    async fn test_probe_fails_without_instance_id() {
        let server = MockServer::start_async().await;

        let result = probe(Client::new(), server.base_url(), String::new()).await;
        assert!(matches!(result, Err(ProbeError::Status { status: 404, .. })));
    }
}
