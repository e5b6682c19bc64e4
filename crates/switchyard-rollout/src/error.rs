//! Release controller errors and their process exit codes.

use thiserror::Error;

use switchyard_compose::{DeployError, ProxyError};
use switchyard_core::{ReleaseVersion, Slot};
use switchyard_health::HealthVerdict;
use switchyard_state::StateError;

/// Result type alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The persisted live slot is unreadable. Never guessed around.
    #[error("registry corrupt: {0}")]
    RegistryCorrupt(String),

    #[error("deployment in progress: {0}")]
    DeploymentInProgress(String),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("slot {slot} never became ready: {}", .verdict.summary())]
    HealthCheckExhausted { slot: Slot, verdict: HealthVerdict },

    #[error("could not switch proxy to slot {slot}: {source}")]
    ProxyReloadFailed {
        slot: Slot,
        #[source]
        source: ProxyError,
    },

    /// The proxy already routes to `slot` but the registry does not say so.
    #[error(
        "promotion of slot {slot} failed after the proxy switch, manual remediation required: {detail}"
    )]
    PromotionFailed { slot: Slot, detail: String },

    /// An earlier run switched the proxy to `slot` but never recorded it.
    #[error(
        "slot {slot} may be serving {version} after an unrecorded promotion; reconcile the live slot before releasing again"
    )]
    UnresolvedPromotion { slot: Slot, version: ReleaseVersion },

    #[error("no previous release to roll back to")]
    NoPreviousRelease,

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("aborted by operator")]
    Aborted,
}

impl From<StateError> for ReleaseError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::RegistryCorrupt(_) => ReleaseError::RegistryCorrupt(err.to_string()),
            StateError::Locked { .. } => ReleaseError::DeploymentInProgress(err.to_string()),
            other => ReleaseError::State(other),
        }
    }
}

impl ReleaseError {
    /// Whether an operator has to repair state before the next run.
    pub fn requires_manual_remediation(&self) -> bool {
        matches!(
            self,
            ReleaseError::RegistryCorrupt(_)
                | ReleaseError::PromotionFailed { .. }
                | ReleaseError::UnresolvedPromotion { .. }
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReleaseError::InvalidVersion(_) => 2,
            ReleaseError::DeploymentInProgress(_) => 3,
            ReleaseError::RegistryCorrupt(_)
            | ReleaseError::PromotionFailed { .. }
            | ReleaseError::UnresolvedPromotion { .. } => 4,
            ReleaseError::Aborted => 5,
            _ => 1,
        }
    }
}
