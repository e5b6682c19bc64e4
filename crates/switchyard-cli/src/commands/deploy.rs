use std::path::Path;

use switchyard_core::ReleaseVersion;

use super::{OutputFormat, build_controller, load_config, print_plan, report_run};

pub async fn run(
    config_path: &Path,
    format: OutputFormat,
    version: ReleaseVersion,
    dry_run: bool,
) -> anyhow::Result<u8> {
    let config = load_config(config_path)?;
    let controller = build_controller(&config)?;

    if dry_run {
        let plan = controller.plan_deploy(version).await?;
        print_plan(&plan, format)?;
        return Ok(0);
    }

    let run = controller.deploy(version).await?;
    report_run(&run, format)
}
