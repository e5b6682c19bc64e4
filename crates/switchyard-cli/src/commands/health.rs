use std::path::Path;
use std::time::Duration;

use tracing::info;

use switchyard_health::{HttpProber, ProbePolicy, Prober};
use switchyard_rollout::ReleaseError;
use switchyard_state::SlotRegistry;

use super::{OutputFormat, load_config, open_registry, print_json};

/// Exits 0 when the target became ready, 1 otherwise.
pub async fn run(
    config_path: &Path,
    format: OutputFormat,
    url: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<u8> {
    let (target, policy) = match url {
        // An explicit URL works without a config file.
        Some(url) if !config_path.exists() => (url, ProbePolicy::default()),
        Some(url) => {
            let config = load_config(config_path)?;
            (url, ProbePolicy::from_config(&config.health)?)
        }
        None => {
            let config = load_config(config_path)?;
            let registry = open_registry(&config)?;
            if !registry.is_initialized().map_err(ReleaseError::from)? {
                info!(
                    slot = %registry.default_slot(),
                    "nothing promoted yet, probing the default slot"
                );
            }
            let live = registry.current().map_err(ReleaseError::from)?;
            (
                config.slot(live).ready_url.clone(),
                ProbePolicy::from_config(&config.health)?,
            )
        }
    };
    let policy = apply_timeout(policy, timeout);

    let verdict = HttpProber.probe(&target, &policy).await;
    match format {
        OutputFormat::Json => print_json(&verdict)?,
        OutputFormat::Text => println!("{target}: {}", verdict.summary()),
    }
    Ok(if verdict.passed { 0 } else { 1 })
}

/// With an explicit timeout the wall clock alone bounds the cycle.
fn apply_timeout(policy: ProbePolicy, timeout: Option<u64>) -> ProbePolicy {
    match timeout {
        Some(secs) => ProbePolicy {
            max_attempts: u32::MAX,
            ..policy.with_timeout(Duration::from_secs(secs))
        },
        None => policy,
    }
}
