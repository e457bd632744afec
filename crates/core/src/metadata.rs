//! Execution environment metadata
//!
//! Resolved once at startup and shared read-only for the lifetime of the process.

use serde::Serialize;
use std::fmt;

/// Cloud provider the process runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cloud {
    /// Amazon Web Services
    Aws,
    /// Google Compute Engine
    Gce,
    /// Unknown or not resolved
    #[default]
    None,
}

impl Cloud {
    /// Derive the region from an availability zone.
    ///
    /// The zone suffix differs per provider: AWS zones end in a single letter
    /// (`us-east-1a`), GCE zones end in `-` plus a letter (`us-central1-a`).
    /// A zone not longer than the suffix yields an empty region.
    pub fn region_from_zone(self, zone: &str) -> String {
        let suffix_len = match self {
            Cloud::Aws => 1,
            Cloud::Gce => 2,
            Cloud::None => return String::new(),
        };

        if zone.len() <= suffix_len || !zone.is_char_boundary(zone.len() - suffix_len) {
            return String::new();
        }
        zone[..zone.len() - suffix_len].to_string()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cloud::Aws => "aws",
            Cloud::Gce => "gce",
            Cloud::None => "none",
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing where this process runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonMetadata {
    pub cloud: Cloud,
    pub region: String,
    pub zone: String,
    pub hostname: String,
    pub instance_id: String,
    pub pod_name: String,
}

impl CommonMetadata {
    /// Metadata for a host whose provider could not be determined
    pub fn unknown(pod_name: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
            ..Self::default()
        }
    }

    /// Whether a cloud provider was resolved
    pub fn is_resolved(&self) -> bool {
        self.cloud != Cloud::None
    }

    /// Render as a single-line JSON document for startup logging
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}
