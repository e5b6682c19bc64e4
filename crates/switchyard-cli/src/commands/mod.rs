pub mod deploy;
pub mod health;
pub mod history;
pub mod init;
pub mod reconcile;
pub mod rollback;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;

use switchyard_compose::{ComposeExecutor, NginxSwitch, ProcessRunner};
use switchyard_core::{ConfigError, SwitchyardConfig};
use switchyard_health::HttpProber;
use switchyard_rollout::{ControllerSettings, ReleaseController, ReleaseError, ReleasePlan, ReleaseRun};
use switchyard_state::{EnvironmentRegistry, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Error)]
#[error("cannot load {}: {reason}", .path.display())]
pub struct ConfigLoadError {
    pub path: PathBuf,
    pub reason: String,
}

pub fn load_config(path: &Path) -> anyhow::Result<SwitchyardConfig> {
    SwitchyardConfig::from_file(path).map_err(|e| {
        ConfigLoadError {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        }
        .into()
    })
}

pub fn open_registry(config: &SwitchyardConfig) -> anyhow::Result<EnvironmentRegistry> {
    let store = StateStore::open(&config.state_db_path()).map_err(ReleaseError::from)?;
    Ok(EnvironmentRegistry::new(store, config.project.default_slot))
}

/// Wire the controller to the real registry, compose, nginx and HTTP probes.
pub fn build_controller(config: &SwitchyardConfig) -> anyhow::Result<ReleaseController> {
    let settings = ControllerSettings::from_config(config)?;
    let runner = Arc::new(ProcessRunner);
    let registry = Arc::new(open_registry(config)?);
    let executor = Arc::new(ComposeExecutor::from_config(config, runner.clone()));
    let proxy = Arc::new(NginxSwitch::from_config(config, runner));
    Ok(ReleaseController::new(
        registry,
        executor,
        Arc::new(HttpProber),
        proxy,
        settings,
    ))
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a finished run and return its exit code.
pub fn report_run(run: &ReleaseRun, format: OutputFormat) -> anyhow::Result<u8> {
    match format {
        OutputFormat::Json => print_json(&run.report)?,
        OutputFormat::Text => print!("{}", run.report.render_text()),
    }
    Ok(exit_code_of(run.exit_code()))
}

pub fn print_plan(plan: &ReleasePlan, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(plan),
        OutputFormat::Text => {
            print!("{}", plan.render_text());
            Ok(())
        }
    }
}

/// Exit code for an error that ended a command before a report was printed.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(release) = err.downcast_ref::<ReleaseError>() {
        return exit_code_of(release.exit_code());
    }
    if err.is::<ConfigLoadError>() || err.is::<ConfigError>() {
        return 2;
    }
    1
}

fn exit_code_of(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
