//! Snapship daemon library
//!
//! Exposes configuration and the daemon lifecycle so integration tests can
//! drive the full pipeline without going through the binary.

pub mod config;
pub mod daemon;

pub use config::{Config, ConfigError};
pub use daemon::{Daemon, DaemonReport};
