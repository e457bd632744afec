//! Core types for Snapship
//!
//! This crate provides:
//! - The immutable execution-environment record (`CommonMetadata`)
//! - Deterministic destination keys for uploaded objects
//! - The upload filter (backup/snapshot directory and uploadable file predicates)
//! - Upload task definitions shared by the watcher and the dispatcher

pub mod filter;
pub mod key;
pub mod metadata;
pub mod task;

// Re-exports
pub use filter::{FilterError, UploadFilter};
pub use key::DestinationKeys;
pub use metadata::{Cloud, CommonMetadata};
pub use task::{Target, UploadTask};
