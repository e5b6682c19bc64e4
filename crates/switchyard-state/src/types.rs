//! Records persisted by the state store.

use serde::{Deserialize, Serialize};

use switchyard_core::{ReleaseVersion, Slot};

/// The last version that was successfully promoted on a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub slot: Slot,
    pub version: ReleaseVersion,
    /// Unix timestamp (seconds) of the promotion.
    pub promoted_at: u64,
}

/// How a release attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Promoted,
    RolledBack,
    PromotionFailed,
    /// An operator settled the live slot after a failed promotion.
    Reconciled,
}

impl ReleaseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReleaseOutcome::Promoted => "promoted",
            ReleaseOutcome::RolledBack => "rolled back",
            ReleaseOutcome::PromotionFailed => "promotion failed",
            ReleaseOutcome::Reconciled => "reconciled",
        }
    }
}

/// One entry of the release history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEvent {
    /// Assigned by the store on append.
    pub seq: u64,
    pub slot: Slot,
    pub version: ReleaseVersion,
    pub outcome: ReleaseOutcome,
    pub detail: Option<String>,
    /// Unix timestamp (seconds).
    pub at: u64,
}

impl ReleaseEvent {
    /// Build an event; `seq` is filled in by the store.
    pub fn new(
        slot: Slot,
        version: ReleaseVersion,
        outcome: ReleaseOutcome,
        detail: Option<String>,
        at: u64,
    ) -> Self {
        Self {
            seq: 0,
            slot,
            version,
            outcome,
            detail,
            at,
        }
    }
}
