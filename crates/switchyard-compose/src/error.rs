//! Executor and proxy error types.

use thiserror::Error;

use switchyard_core::{ReleaseVersion, Slot};

/// Result type alias for executor operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Failure to start or stop a slot's service set.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A resource the slot needs is taken, e.g. its port is bound by the live slot.
    #[error("resource unavailable for slot {slot}: {detail}")]
    ResourceUnavailable { slot: Slot, detail: String },

    /// The requested version cannot be fetched from the artifact registry.
    #[error("artifact {version} unavailable: {detail}")]
    ArtifactUnavailable {
        version: ReleaseVersion,
        detail: String,
    },

    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("unreadable compose status: {0}")]
    Status(String),

    #[error("slot marker error: {0}")]
    Marker(String),
}

/// Failure to repoint the reverse proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to write upstream file: {0}")]
    Write(String),

    #[error("proxy rejected the new configuration: {0}")]
    ConfigTest(String),

    #[error("proxy reload failed: {0}")]
    Reload(String),
}
