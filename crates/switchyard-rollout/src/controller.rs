//! Release controller — drives the release state machine.
//!
//! A run deploys a version into the idle slot, gates it on readiness,
//! switches the proxy, records the promotion and drains the old slot.
//! Any failure before the registry write tears the new slot down and
//! leaves the registry where it was.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use switchyard_compose::{DeployResult, Executor, TrafficSwitch};
use switchyard_core::config::{SlotEndpoint, SlotsConfig};
use switchyard_core::{
    ConfigError, DeploymentDescriptor, ReleaseVersion, Slot, SwitchyardConfig, epoch_secs,
};
use switchyard_health::{HealthVerdict, ProbePolicy, Prober};
use switchyard_state::{ReleaseEvent, ReleaseOutcome, ReleaseRecord, RunLock, SlotRegistry};

use crate::error::{ReleaseError, ReleaseResult};
use crate::phase::{ReleasePhase, StepOutcome, transition};
use crate::report::{ReleasePlan, ReleaseReport, ReleaseRun, RunKind};

/// History entries scanned when resolving `previous`.
const HISTORY_SCAN: usize = 256;

/// Target of a manual rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// The last release before the live one.
    Previous,
    Version(ReleaseVersion),
}

impl FromStr for RollbackTarget {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == "previous" {
            return Ok(RollbackTarget::Previous);
        }
        ReleaseVersion::parse(s)
            .map(RollbackTarget::Version)
            .map_err(|e| ReleaseError::InvalidVersion(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub slots: SlotsConfig,
    pub policy: ProbePolicy,
    pub lock_path: PathBuf,
}

impl ControllerSettings {
    pub fn from_config(config: &SwitchyardConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            slots: config.slots.clone(),
            policy: ProbePolicy::from_config(&config.health)?,
            lock_path: config.lock_path(),
        })
    }
}

/// Mutable state of one run.
struct Attempt {
    descriptor: DeploymentDescriptor,
    live: Option<Slot>,
    report: ReleaseReport,
    failure: Option<ReleaseError>,
}

impl Attempt {
    fn fail(&mut self, err: ReleaseError, outcome: StepOutcome) -> StepOutcome {
        self.failure = Some(err);
        outcome
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.report.warnings.push(message);
    }
}

pub struct ReleaseController {
    registry: Arc<dyn SlotRegistry>,
    executor: Arc<dyn Executor>,
    prober: Arc<dyn Prober>,
    proxy: Arc<dyn TrafficSwitch>,
    settings: ControllerSettings,
}

impl ReleaseController {
    pub fn new(
        registry: Arc<dyn SlotRegistry>,
        executor: Arc<dyn Executor>,
        prober: Arc<dyn Prober>,
        proxy: Arc<dyn TrafficSwitch>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            registry,
            executor,
            prober,
            proxy,
            settings,
        }
    }

    /// Deploy `version` into the idle slot and promote it if it becomes ready.
    ///
    /// Fails fast with [`ReleaseError::DeploymentInProgress`] if another
    /// run holds the lock. Errors that end the state machine are carried
    /// in the returned [`ReleaseRun`].
    pub async fn deploy(&self, version: ReleaseVersion) -> ReleaseResult<ReleaseRun> {
        let _lock = RunLock::acquire(&self.settings.lock_path)?;
        self.run(RunKind::Deploy, version).await
    }

    /// Deploy an earlier version forward into the idle slot.
    pub async fn rollback(&self, target: &RollbackTarget) -> ReleaseResult<ReleaseRun> {
        let _lock = RunLock::acquire(&self.settings.lock_path)?;
        let version = self.resolve_rollback(target)?;
        info!(%version, "rollback target resolved");
        self.run(RunKind::Rollback, version).await
    }

    /// What [`deploy`](Self::deploy) would do, without changing anything.
    pub async fn plan_deploy(&self, version: ReleaseVersion) -> ReleaseResult<ReleasePlan> {
        self.plan(RunKind::Deploy, version).await
    }

    /// What [`rollback`](Self::rollback) would do, without changing anything.
    pub async fn plan_rollback(&self, target: &RollbackTarget) -> ReleaseResult<ReleasePlan> {
        let version = self.resolve_rollback(target)?;
        self.plan(RunKind::Rollback, version).await
    }

    /// Settle the live slot after a promotion failed half way.
    ///
    /// Points the proxy at `slot` and records it as live. Choosing the slot
    /// whose promotion failed completes that promotion; choosing the other
    /// slot requires it to hold an earlier release. Returns `None` when no
    /// failed promotion is outstanding.
    pub async fn reconcile(&self, slot: Slot) -> ReleaseResult<Option<ReleaseRecord>> {
        let _lock = RunLock::acquire(&self.settings.lock_path)?;
        let Some(failed) = self.unresolved_promotion()? else {
            info!("no failed promotion to reconcile");
            return Ok(None);
        };

        let record = if slot == failed.slot {
            ReleaseRecord {
                slot,
                version: failed.version,
                promoted_at: epoch_secs(),
            }
        } else {
            self.registry
                .release_for(slot)?
                .ok_or(ReleaseError::NoPreviousRelease)?
        };

        self.proxy
            .switch_to(slot, self.endpoint(slot).port)
            .await
            .map_err(|source| ReleaseError::ProxyReloadFailed { slot, source })?;

        if slot == failed.slot {
            self.registry.promote(&record)?;
        } else {
            self.registry.set_current(slot)?;
            self.registry.record_event(ReleaseEvent::new(
                slot,
                record.version.clone(),
                ReleaseOutcome::Reconciled,
                Some(format!("promotion of slot {} abandoned", failed.slot)),
                epoch_secs(),
            ))?;
        }
        info!(%slot, version = %record.version, "live slot reconciled");
        Ok(Some(record))
    }

    pub fn resolve_rollback(&self, target: &RollbackTarget) -> ReleaseResult<ReleaseVersion> {
        match target {
            RollbackTarget::Version(version) => Ok(version.clone()),
            RollbackTarget::Previous => self.previous_version(),
        }
    }

    /// The idle slot's last release if it differs from the live one,
    /// else the newest promoted version that differs.
    fn previous_version(&self) -> ReleaseResult<ReleaseVersion> {
        let Some(live) = self.registry.lookup()? else {
            return Err(ReleaseError::NoPreviousRelease);
        };
        let live_version = self.registry.release_for(live)?.map(|r| r.version);

        if let Some(idle) = self.registry.release_for(live.other())? {
            if Some(&idle.version) != live_version.as_ref() {
                return Ok(idle.version);
            }
        }

        self.registry
            .history(HISTORY_SCAN)?
            .into_iter()
            .filter(|event| event.outcome == ReleaseOutcome::Promoted)
            .map(|event| event.version)
            .find(|version| Some(version) != live_version.as_ref())
            .ok_or(ReleaseError::NoPreviousRelease)
    }

    /// The newest history event, if it is a promotion that never landed.
    fn unresolved_promotion(&self) -> ReleaseResult<Option<ReleaseEvent>> {
        Ok(self
            .registry
            .history(1)?
            .into_iter()
            .next()
            .filter(|event| event.outcome == ReleaseOutcome::PromotionFailed))
    }

    /// Refuse to release while the proxy and registry may disagree.
    fn ensure_settled(&self) -> ReleaseResult<()> {
        match self.unresolved_promotion()? {
            Some(event) => Err(ReleaseError::UnresolvedPromotion {
                slot: event.slot,
                version: event.version,
            }),
            None => Ok(()),
        }
    }

    /// Live slot and the slot a run would deploy into.
    ///
    /// Before the first promotion the default slot is the target and
    /// nothing is live.
    fn resolve_slots(&self) -> ReleaseResult<(Option<Slot>, Slot)> {
        let live = self.registry.lookup()?;
        let target = match live {
            Some(slot) => slot.other(),
            None => self.registry.default_slot(),
        };
        Ok((live, target))
    }

    fn endpoint(&self, slot: Slot) -> &SlotEndpoint {
        match slot {
            Slot::Blue => &self.settings.slots.blue,
            Slot::Green => &self.settings.slots.green,
        }
    }

    async fn plan(&self, kind: RunKind, version: ReleaseVersion) -> ReleaseResult<ReleasePlan> {
        self.ensure_settled()?;
        let (live, target) = self.resolve_slots()?;
        let rebuild_target = self.executor.is_running(target).await?;
        Ok(ReleasePlan {
            kind,
            version,
            live_slot: live,
            target_slot: target,
            rebuild_target,
            probe_url: self.endpoint(target).ready_url.clone(),
            drain_slot: live.filter(|slot| *slot != target),
        })
    }

    async fn run(&self, kind: RunKind, version: ReleaseVersion) -> ReleaseResult<ReleaseRun> {
        self.ensure_settled()?;
        let (live, target) = self.resolve_slots()?;
        info!(
            kind = kind.as_str(),
            %version,
            live = ?live,
            %target,
            "release started"
        );

        let mut attempt = Attempt {
            descriptor: DeploymentDescriptor::new(version.clone(), target),
            live,
            report: ReleaseReport::new(kind, version, live, target),
            failure: None,
        };

        let mut phase = ReleasePhase::Idle;
        loop {
            attempt.report.phases.push(phase);
            let outcome = self.step(phase, &mut attempt).await;
            let next = transition(phase, outcome);
            debug!(from = %phase, to = %next, ?outcome, "phase transition");
            phase = next;
            if phase == ReleasePhase::Idle {
                attempt.report.phases.push(phase);
                break;
            }
            info!(%phase, slot = %target, "entering phase");
        }

        let Attempt {
            mut report,
            failure,
            ..
        } = attempt;
        match &failure {
            None => {
                info!(slot = %target, version = %report.version, "release promoted");
            }
            Some(err) => {
                report.error = Some(err.to_string());
                report.manual_remediation = err.requires_manual_remediation();
                if let Some(live) = report.live_slot {
                    report.live_health = Some(self.check_live(live).await);
                }
                if report.manual_remediation {
                    error!(error = %err, "release failed, manual remediation required");
                } else {
                    warn!(error = %err, live = ?report.live_slot, "release failed and was rolled back");
                }
            }
        }

        Ok(ReleaseRun {
            report,
            error: failure,
        })
    }

    async fn step(&self, phase: ReleasePhase, attempt: &mut Attempt) -> StepOutcome {
        match phase {
            ReleasePhase::Idle => StepOutcome::Succeeded,
            ReleasePhase::DeployingNext => match self.deploy_next(&attempt.descriptor).await {
                Ok(()) => StepOutcome::Succeeded,
                Err(e) => attempt.fail(e.into(), StepOutcome::Failed),
            },
            ReleasePhase::ProbingNext => self.probe_next(attempt).await,
            ReleasePhase::Promoting => self.promote(attempt).await,
            ReleasePhase::DrainingOld => {
                self.drain_old(attempt).await;
                StepOutcome::Succeeded
            }
            ReleasePhase::RollingBack => {
                self.roll_back(attempt).await;
                StepOutcome::Succeeded
            }
        }
    }

    /// Rebuild the target slot from scratch, whatever state it is in.
    async fn deploy_next(&self, descriptor: &DeploymentDescriptor) -> DeployResult<()> {
        let slot = descriptor.slot;
        if self.executor.is_running(slot).await? {
            info!(%slot, "target slot is running, tearing it down first");
            self.executor.bring_down(slot).await?;
        }
        self.executor.bring_up(descriptor).await
    }

    async fn probe_next(&self, attempt: &mut Attempt) -> StepOutcome {
        let slot = attempt.descriptor.slot;
        let verdict = self
            .prober
            .probe(&self.endpoint(slot).ready_url, &self.settings.policy)
            .await;
        attempt.report.verdict = Some(verdict.clone());
        if verdict.passed {
            StepOutcome::Succeeded
        } else {
            attempt.fail(
                ReleaseError::HealthCheckExhausted { slot, verdict },
                StepOutcome::Failed,
            )
        }
    }

    /// Switch traffic, then record the promotion.
    ///
    /// The registry never names a slot the proxy is not routing to. A
    /// failed registry write after the switch is not retried.
    async fn promote(&self, attempt: &mut Attempt) -> StepOutcome {
        let slot = attempt.descriptor.slot;
        if let Err(source) = self.proxy.switch_to(slot, self.endpoint(slot).port).await {
            return attempt.fail(
                ReleaseError::ProxyReloadFailed { slot, source },
                StepOutcome::Failed,
            );
        }

        let record = ReleaseRecord {
            slot,
            version: attempt.descriptor.version.clone(),
            promoted_at: epoch_secs(),
        };
        match self.registry.promote(&record) {
            Ok(()) => {
                attempt.report.promoted = true;
                attempt.report.live_slot = Some(slot);
                StepOutcome::Succeeded
            }
            Err(e) => {
                let detail = e.to_string();
                error!(%slot, error = %detail, "registry write failed after proxy switch");
                let event = ReleaseEvent::new(
                    slot,
                    record.version,
                    ReleaseOutcome::PromotionFailed,
                    Some(detail.clone()),
                    epoch_secs(),
                );
                if let Err(e) = self.registry.record_event(event) {
                    debug!(error = %e, "could not record failed promotion");
                }
                let recorded = attempt
                    .live
                    .map(|s| format!("slot {s}"))
                    .unwrap_or_else(|| "no slot".to_string());
                attempt.warn(format!(
                    "proxy routes to slot {slot} but the registry still names {recorded}"
                ));
                attempt.report.live_slot = Some(slot);
                attempt.fail(
                    ReleaseError::PromotionFailed { slot, detail },
                    StepOutcome::Halted,
                )
            }
        }
    }

    async fn drain_old(&self, attempt: &mut Attempt) {
        let target = attempt.descriptor.slot;
        match attempt.live {
            Some(old) if old != target => {
                if let Err(e) = self.executor.bring_down(old).await {
                    attempt.warn(format!("failed to stop old slot {old}: {e}"));
                }
            }
            _ => debug!("no previous slot to drain"),
        }
    }

    async fn roll_back(&self, attempt: &mut Attempt) {
        let slot = attempt.descriptor.slot;
        if let Err(e) = self.executor.bring_down(slot).await {
            attempt.warn(format!("failed to tear down slot {slot}: {e}"));
        }
        let event = ReleaseEvent::new(
            slot,
            attempt.descriptor.version.clone(),
            ReleaseOutcome::RolledBack,
            attempt.failure.as_ref().map(ToString::to_string),
            epoch_secs(),
        );
        if let Err(e) = self.registry.record_event(event) {
            attempt.warn(format!("failed to record rollback in history: {e}"));
        }
    }

    /// One readiness attempt against the live slot, for the failure report.
    async fn check_live(&self, slot: Slot) -> HealthVerdict {
        let policy = ProbePolicy {
            max_attempts: 1,
            timeout: self.settings.policy.request_timeout,
            ..self.settings.policy.clone()
        };
        self.prober.probe(&self.endpoint(slot).ready_url, &policy).await
    }
}
