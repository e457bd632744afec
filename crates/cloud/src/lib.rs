//! Cloud identity resolution
//!
//! Probes the AWS and GCE instance metadata services concurrently and turns
//! whichever answers first into a [`CommonMetadata`] record.

pub mod aws;
pub mod gce;
pub mod resolve;

pub use resolve::{Endpoints, IdentityResolver};
pub use snapship_core::{Cloud, CommonMetadata};

/// Metadata probe errors
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("{url} did not identify as a GCE metadata server")]
    NotGce { url: String },
}
