//! Release state machine.
//!
//! A run starts in `Idle`, moves through deploy, probe and promotion of
//! the idle slot, and ends back in `Idle` either after draining the old
//! slot or after rolling the attempt back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phases of a release run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleasePhase {
    /// No run in progress. Start and end of every run.
    Idle,
    /// Bringing up the target slot with the new version.
    DeployingNext,
    /// Waiting for the target slot to report ready.
    ProbingNext,
    /// Switching the proxy and recording the target slot as live.
    Promoting,
    /// Stopping the slot that was live before promotion.
    DrainingOld,
    /// Tearing down a failed target slot.
    RollingBack,
}

impl ReleasePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleasePhase::Idle => "Idle",
            ReleasePhase::DeployingNext => "DeployingNext",
            ReleasePhase::ProbingNext => "ProbingNext",
            ReleasePhase::Promoting => "Promoting",
            ReleasePhase::DrainingOld => "DrainingOld",
            ReleasePhase::RollingBack => "RollingBack",
        }
    }
}

impl fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one phase's step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    /// The step failed in a way the controller can clean up after.
    Failed,
    /// The step failed leaving ambiguous state; stop without cleanup.
    Halted,
}

/// Next phase after `phase` finished with `outcome`.
pub fn transition(phase: ReleasePhase, outcome: StepOutcome) -> ReleasePhase {
    use ReleasePhase::*;
    use StepOutcome::*;

    match (phase, outcome) {
        (_, Halted) => Idle,
        (Idle, Succeeded) => DeployingNext,
        (Idle, Failed) => Idle,
        (DeployingNext, Succeeded) => ProbingNext,
        (ProbingNext, Succeeded) => Promoting,
        (Promoting, Succeeded) => DrainingOld,
        (DeployingNext | ProbingNext | Promoting, Failed) => RollingBack,
        // Drain failures are warnings; the new slot is already live.
        (DrainingOld, _) => Idle,
        (RollingBack, _) => Idle,
    }
}
