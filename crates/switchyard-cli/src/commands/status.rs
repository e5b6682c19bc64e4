use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use switchyard_compose::{ComposeExecutor, Executor, ProcessRunner};
use switchyard_core::{ReleaseVersion, Slot};
use switchyard_health::{HealthVerdict, HttpProber, ProbePolicy, Prober};
use switchyard_rollout::ReleaseError;
use switchyard_state::{ReleaseRecord, SlotRegistry};

use super::{OutputFormat, load_config, open_registry, print_json};

#[derive(Debug, Serialize)]
struct SlotStatus {
    slot: Slot,
    live: bool,
    running: bool,
    /// Version the slot was brought up with, while running.
    version: Option<ReleaseVersion>,
    last_release: Option<ReleaseRecord>,
    ready: Option<HealthVerdict>,
    /// Liveness, for diagnostics only.
    liveness: Option<HealthVerdict>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    project: String,
    live_slot: Option<Slot>,
    default_slot: Slot,
    slots: Vec<SlotStatus>,
}

pub async fn run(config_path: &Path, format: OutputFormat) -> anyhow::Result<u8> {
    let config = load_config(config_path)?;
    let registry = open_registry(&config)?;
    let live = registry.lookup().map_err(ReleaseError::from)?;
    let executor = ComposeExecutor::from_config(&config, Arc::new(ProcessRunner));

    let policy = ProbePolicy::from_config(&config.health)?;
    let once = ProbePolicy {
        max_attempts: 1,
        timeout: policy.request_timeout,
        ..policy
    };

    let mut slots = Vec::with_capacity(Slot::ALL.len());
    for slot in Slot::ALL {
        let endpoint = config.slot(slot);
        let running = executor.is_running(slot).await.map_err(ReleaseError::from)?;
        let mut status = SlotStatus {
            slot,
            live: live == Some(slot),
            running,
            version: None,
            last_release: registry.release_for(slot).map_err(ReleaseError::from)?,
            ready: None,
            liveness: None,
        };
        if running {
            status.version = executor
                .running_version(slot)
                .await
                .map_err(ReleaseError::from)?;
            status.ready = Some(HttpProber.probe(&endpoint.ready_url, &once).await);
            if let Some(url) = &endpoint.live_url {
                status.liveness = Some(HttpProber.probe(url, &once).await);
            }
        }
        slots.push(status);
    }

    let report = StatusReport {
        project: config.project.name.clone(),
        live_slot: live,
        default_slot: registry.default_slot(),
        slots,
    };
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print!("{}", render_text(&report)),
    }
    Ok(0)
}

fn render_text(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "project:   {}", report.project);
    match report.live_slot {
        Some(slot) => {
            let _ = writeln!(out, "live slot: {slot}");
        }
        None => {
            let _ = writeln!(
                out,
                "live slot: none (first deploy targets {})",
                report.default_slot
            );
        }
    }
    for status in &report.slots {
        let marker = if status.live { "*" } else { " " };
        let state = if status.running { "running" } else { "stopped" };
        let version = status
            .version
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{marker} {:<5}  {state:<7}  {version}",
            status.slot.as_str()
        );
        if let Some(release) = &status.last_release {
            let _ = writeln!(
                out,
                "    last release: {} (promoted at {})",
                release.version, release.promoted_at
            );
        }
        if let Some(ready) = &status.ready {
            let _ = writeln!(out, "    readiness:    {}", ready.summary());
        }
        if let Some(liveness) = &status.liveness {
            let _ = writeln!(out, "    liveness:     {}", liveness.summary());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_marks_live_slot_and_default() {
        let report = StatusReport {
            project: "clinomic".to_string(),
            live_slot: Some(Slot::Green),
            default_slot: Slot::Blue,
            slots: vec![
                SlotStatus {
                    slot: Slot::Blue,
                    live: false,
                    running: false,
                    version: None,
                    last_release: None,
                    ready: None,
                    liveness: None,
                },
                SlotStatus {
                    slot: Slot::Green,
                    live: true,
                    running: true,
                    version: Some(ReleaseVersion::parse("v2").unwrap()),
                    last_release: Some(ReleaseRecord {
                        slot: Slot::Green,
                        version: ReleaseVersion::parse("v2").unwrap(),
                        promoted_at: 1_700_000_000,
                    }),
                    ready: None,
                    liveness: None,
                },
            ],
        };
        let text = render_text(&report);
        assert!(text.contains("live slot: green"));
        assert!(text.contains("  blue   stopped  -"));
        assert!(text.contains("* green  running  v2"));
        assert!(text.contains("last release: v2"));

        let fresh = StatusReport {
            live_slot: None,
            slots: Vec::new(),
            ..report
        };
        assert!(render_text(&fresh).contains("none (first deploy targets blue)"));
    }
}
