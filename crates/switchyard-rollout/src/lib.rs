//! switchyard-rollout — the blue-green release controller.
//!
//! Deploys a version into the idle slot, waits for it to report ready,
//! moves traffic and records the promotion. Every run is a walk through
//! [`ReleasePhase`]s driven by [`transition`]; failures before the
//! registry write roll the attempt back and leave the live slot alone.
//!
//! # Components
//!
//! - **`phase`** — Release phases and the transition function
//! - **`controller`** — Run orchestration, manual rollback, dry-run plans
//! - **`report`** — Per-run reports for the CLI
//! - **`error`** — Release error taxonomy and exit codes

pub mod controller;
pub mod error;
pub mod phase;
pub mod report;

pub use controller::{ControllerSettings, ReleaseController, RollbackTarget};
pub use error::{ReleaseError, ReleaseResult};
pub use phase::{ReleasePhase, StepOutcome, transition};
pub use report::{ReleasePlan, ReleaseReport, ReleaseRun, RunKind};
