//! Run reports and dry-run plans.

use std::fmt::Write as _;

use serde::Serialize;

use switchyard_core::{ReleaseVersion, Slot};
use switchyard_health::HealthVerdict;

use crate::error::ReleaseError;
use crate::phase::ReleasePhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Deploy,
    Rollback,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Deploy => "deploy",
            RunKind::Rollback => "rollback",
        }
    }
}

/// What happened during one deploy or rollback run.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub kind: RunKind,
    pub version: ReleaseVersion,
    /// Live slot when the run started; `None` on a fresh registry.
    pub previous_slot: Option<Slot>,
    pub target_slot: Slot,
    /// Every phase entered, in order.
    pub phases: Vec<ReleasePhase>,
    pub promoted: bool,
    /// Slot serving traffic when the run ended.
    pub live_slot: Option<Slot>,
    /// Readiness verdict for the target slot.
    pub verdict: Option<HealthVerdict>,
    /// Readiness of the live slot, checked after a failed run.
    pub live_health: Option<HealthVerdict>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub manual_remediation: bool,
}

impl ReleaseReport {
    pub(crate) fn new(
        kind: RunKind,
        version: ReleaseVersion,
        previous_slot: Option<Slot>,
        target_slot: Slot,
    ) -> Self {
        Self {
            kind,
            version,
            previous_slot,
            target_slot,
            phases: Vec::new(),
            promoted: false,
            live_slot: previous_slot,
            verdict: None,
            live_health: None,
            warnings: Vec::new(),
            error: None,
            manual_remediation: false,
        }
    }

    /// Human-readable multi-line rendering.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let phases: Vec<&str> = self.phases.iter().map(|p| p.as_str()).collect();
        let _ = writeln!(
            out,
            "{} {} -> slot {}",
            self.kind.as_str(),
            self.version,
            self.target_slot
        );
        let _ = writeln!(out, "  phases:   {}", phases.join(" -> "));
        if let Some(verdict) = &self.verdict {
            let _ = writeln!(out, "  probe:    {}", verdict.summary());
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "  warning:  {warning}");
        }
        if self.promoted {
            let _ = writeln!(out, "  outcome:  promoted, slot {} is live", self.target_slot);
            return out;
        }

        let _ = writeln!(
            out,
            "  outcome:  FAILED: {}",
            self.error.as_deref().unwrap_or("unknown error")
        );
        match self.live_slot {
            Some(live) => {
                let health = self
                    .live_health
                    .as_ref()
                    .map(|v| v.summary())
                    .unwrap_or_else(|| "not checked".to_string());
                let _ = writeln!(out, "  live:     slot {live} ({health})");
            }
            None => {
                let _ = writeln!(out, "  live:     no slot has been promoted yet");
            }
        }
        if self.manual_remediation {
            let _ = writeln!(
                out,
                "  ACTION REQUIRED: inspect the proxy, then run `switchyard reconcile --slot <live slot>`"
            );
        }
        out
    }
}

/// A finished run: the report plus the error that ended it, if any.
#[derive(Debug)]
pub struct ReleaseRun {
    pub report: ReleaseReport,
    pub error: Option<ReleaseError>,
}

impl ReleaseRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, ReleaseError::exit_code)
    }
}

/// Result of a dry run: what a deploy or rollback would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleasePlan {
    pub kind: RunKind,
    pub version: ReleaseVersion,
    pub live_slot: Option<Slot>,
    pub target_slot: Slot,
    /// The target slot is running and would be rebuilt.
    pub rebuild_target: bool,
    pub probe_url: String,
    /// Slot that would be stopped after promotion.
    pub drain_slot: Option<Slot>,
}

impl ReleasePlan {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "dry run: {} {} (nothing will be changed)",
            self.kind.as_str(),
            self.version
        );
        let live = self
            .live_slot
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(out, "  live slot:   {live}");
        let _ = writeln!(out, "  target slot: {}", self.target_slot);
        if self.rebuild_target {
            let _ = writeln!(out, "  teardown:    slot {} is running and would be rebuilt", self.target_slot);
        }
        let _ = writeln!(out, "  probe:       {}", self.probe_url);
        if let Some(drain) = self.drain_slot {
            let _ = writeln!(out, "  drain:       slot {drain} after promotion");
        }
        out
    }
}
