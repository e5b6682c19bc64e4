use std::path::Path;

use serde::Serialize;

use switchyard_core::Slot;
use switchyard_state::ReleaseRecord;

use super::{OutputFormat, build_controller, load_config, print_json};

#[derive(Debug, Serialize)]
struct ReconcileReport {
    slot: Slot,
    /// `None` when there was nothing to settle.
    release: Option<ReleaseRecord>,
}

/// Point the proxy and the registry at `slot` after a failed promotion.
pub async fn run(config_path: &Path, format: OutputFormat, slot: Slot) -> anyhow::Result<u8> {
    let config = load_config(config_path)?;
    let controller = build_controller(&config)?;
    let report = ReconcileReport {
        slot,
        release: controller.reconcile(slot).await?,
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => println!("{}", render_text(&report)),
    }
    Ok(0)
}

fn render_text(report: &ReconcileReport) -> String {
    match &report.release {
        Some(release) => format!("✓ slot {} is live with {}", report.slot, release.version),
        None => "no failed promotion to reconcile".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ReleaseVersion;

    #[test]
    fn text_names_live_slot_and_version() {
        let report = ReconcileReport {
            slot: Slot::Green,
            release: Some(ReleaseRecord {
                slot: Slot::Green,
                version: ReleaseVersion::parse("v2").unwrap(),
                promoted_at: 1_700_000_000,
            }),
        };
        assert_eq!(render_text(&report), "✓ slot green is live with v2");

        let idle = ReconcileReport {
            slot: Slot::Blue,
            release: None,
        };
        assert_eq!(render_text(&idle), "no failed promotion to reconcile");
    }
}
