//! Deployment executor — brings a slot's service set up or down.
//!
//! Each slot runs as its own compose project (`{project}-{slot}`) built
//! from the same compose file. The slot, its host port and the release
//! version are passed to compose as `DEPLOY_SLOT`, `SLOT_PORT` and
//! `APP_VERSION`. The version a slot was last brought up with is kept in
//! a marker file so repeated `bring_up` calls can be recognized.

use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use switchyard_core::{DeploymentDescriptor, ReleaseVersion, Slot, SwitchyardConfig};

use crate::error::{DeployError, DeployResult};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Boxed future returned by [`Executor`] methods.
pub type DeployFuture<'a, T> = Pin<Box<dyn Future<Output = DeployResult<T>> + Send + 'a>>;

/// Starts and stops slot workloads, independent of which slot is live.
pub trait Executor: Send + Sync {
    /// Start the slot's service set at the descriptor's version.
    ///
    /// Calling it again with the same descriptor on a running slot is a
    /// no-op success.
    fn bring_up<'a>(&'a self, descriptor: &'a DeploymentDescriptor) -> DeployFuture<'a, ()>;

    /// Stop the slot's service set. Stopping a stopped slot succeeds.
    fn bring_down(&self, slot: Slot) -> DeployFuture<'_, ()>;

    /// Whether any service of the slot is running.
    fn is_running(&self, slot: Slot) -> DeployFuture<'_, bool>;

    /// The version the slot was last brought up with, while it runs.
    fn running_version(&self, slot: Slot) -> DeployFuture<'_, Option<ReleaseVersion>>;
}

/// One row of `compose ps --format json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PsEntry {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "State")]
    pub state: String,
}

/// Parse `compose ps --format json` output.
///
/// Older compose releases print one JSON array, newer ones one object
/// per line.
pub fn parse_ps_output(stdout: &str) -> DeployResult<Vec<PsEntry>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| DeployError::Status(e.to_string()));
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| DeployError::Status(e.to_string())))
        .collect()
}

/// [`Executor`] driving `docker compose`.
pub struct ComposeExecutor {
    runner: Arc<dyn CommandRunner>,
    compose_command: Vec<String>,
    project: String,
    compose_file: PathBuf,
    services: Vec<String>,
    blue_port: u16,
    green_port: u16,
    marker_dir: PathBuf,
}

impl ComposeExecutor {
    pub fn from_config(config: &SwitchyardConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            compose_command: config.project.compose_command.clone(),
            project: config.project.name.clone(),
            compose_file: config.project.compose_file.clone(),
            services: config.project.services.clone(),
            blue_port: config.slots.blue.port,
            green_port: config.slots.green.port,
            marker_dir: config.project.state_dir.clone(),
        }
    }

    pub fn project_name(&self, slot: Slot) -> String {
        format!("{}-{}", self.project, slot)
    }

    fn port(&self, slot: Slot) -> u16 {
        match slot {
            Slot::Blue => self.blue_port,
            Slot::Green => self.green_port,
        }
    }

    fn marker_path(&self, slot: Slot) -> PathBuf {
        self.marker_dir.join(format!("{slot}.version"))
    }

    /// Base compose invocation for `slot`, with its environment.
    fn compose(&self, slot: Slot, version: Option<&ReleaseVersion>) -> CommandSpec {
        let version = version
            .map(|v| v.to_string())
            .or_else(|| self.read_marker(slot).map(|v| v.to_string()))
            .unwrap_or_else(|| "latest".to_string());
        let base = CommandSpec::from_argv(&self.compose_command).unwrap_or(CommandSpec {
            program: "docker".to_string(),
            args: vec!["compose".to_string()],
            env: Vec::new(),
        });
        base.args(["-p".to_string(), self.project_name(slot)])
            .args(["-f".to_string(), self.compose_file.display().to_string()])
            .env("DEPLOY_SLOT", slot.as_str())
            .env("SLOT_PORT", self.port(slot).to_string())
            .env("APP_VERSION", version)
    }

    async fn run(&self, spec: &CommandSpec) -> DeployResult<CommandOutput> {
        self.runner
            .run(spec)
            .await
            .map_err(|e| DeployError::CommandFailed {
                command: spec.display(),
                detail: e.to_string(),
            })
    }

    /// Services of the set that are currently in the `running` state.
    async fn running_services(&self, slot: Slot) -> DeployResult<Vec<String>> {
        let spec = self.compose(slot, None).args(["ps", "--format", "json"]);
        let output = self.run(&spec).await?;
        if !output.success {
            return Err(DeployError::CommandFailed {
                command: spec.display(),
                detail: output.diagnostic(),
            });
        }
        let running = parse_ps_output(&output.stdout)?
            .into_iter()
            .filter(|entry| entry.state == "running" && self.services.contains(&entry.service))
            .map(|entry| entry.service)
            .collect();
        Ok(running)
    }

    fn read_marker(&self, slot: Slot) -> Option<ReleaseVersion> {
        let raw = fs::read_to_string(self.marker_path(slot)).ok()?;
        ReleaseVersion::parse(&raw).ok()
    }

    fn write_marker(&self, slot: Slot, version: &ReleaseVersion) -> DeployResult<()> {
        let path = self.marker_path(slot);
        let tmp = path.with_extension("version.tmp");
        fs::create_dir_all(&self.marker_dir).map_err(|e| DeployError::Marker(e.to_string()))?;
        fs::write(&tmp, format!("{version}\n")).map_err(|e| DeployError::Marker(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| DeployError::Marker(e.to_string()))?;
        Ok(())
    }

    fn clear_marker(&self, slot: Slot) -> DeployResult<()> {
        match fs::remove_file(self.marker_path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::Marker(e.to_string())),
        }
    }

    async fn up(&self, descriptor: &DeploymentDescriptor) -> DeployResult<()> {
        let slot = descriptor.slot;
        let version = &descriptor.version;

        let running = self.running_services(slot).await?;
        if running.len() == self.services.len() && self.read_marker(slot).as_ref() == Some(version)
        {
            info!(%slot, %version, "slot already running this version");
            return Ok(());
        }

        let pull = self
            .compose(slot, Some(version))
            .arg("pull")
            .args(self.services.iter().cloned());
        let output = self.run(&pull).await?;
        if !output.success {
            warn!(%slot, %version, "image pull failed");
            return Err(DeployError::ArtifactUnavailable {
                version: version.clone(),
                detail: output.diagnostic(),
            });
        }

        let up = self
            .compose(slot, Some(version))
            .args(["up", "-d", "--remove-orphans"])
            .args(self.services.iter().cloned());
        let output = self.run(&up).await?;
        if !output.success {
            return Err(classify_failure(slot, version, &up, &output));
        }

        self.write_marker(slot, version)?;
        info!(%slot, %version, project = %self.project_name(slot), "slot brought up");
        Ok(())
    }

    async fn down(&self, slot: Slot) -> DeployResult<()> {
        let spec = self.compose(slot, None).args(["down", "--remove-orphans"]);
        let output = self.run(&spec).await?;
        if !output.success {
            return Err(DeployError::CommandFailed {
                command: spec.display(),
                detail: output.diagnostic(),
            });
        }
        self.clear_marker(slot)?;
        info!(%slot, project = %self.project_name(slot), "slot brought down");
        Ok(())
    }
}

impl Executor for ComposeExecutor {
    fn bring_up<'a>(&'a self, descriptor: &'a DeploymentDescriptor) -> DeployFuture<'a, ()> {
        Box::pin(self.up(descriptor))
    }

    fn bring_down(&self, slot: Slot) -> DeployFuture<'_, ()> {
        Box::pin(self.down(slot))
    }

    fn is_running(&self, slot: Slot) -> DeployFuture<'_, bool> {
        Box::pin(async move {
            let running = self.running_services(slot).await?;
            debug!(%slot, running = running.len(), total = self.services.len(), "slot state");
            Ok(!running.is_empty())
        })
    }

    fn running_version(&self, slot: Slot) -> DeployFuture<'_, Option<ReleaseVersion>> {
        Box::pin(async move {
            if self.running_services(slot).await?.is_empty() {
                return Ok(None);
            }
            Ok(self.read_marker(slot))
        })
    }
}

/// Map a failed `up` to the error taxonomy using compose's diagnostics.
fn classify_failure(
    slot: Slot,
    version: &ReleaseVersion,
    spec: &CommandSpec,
    output: &CommandOutput,
) -> DeployError {
    let detail = output.diagnostic();
    let lower = detail.to_lowercase();
    if ["port is already allocated", "address already in use", "bind for"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        DeployError::ResourceUnavailable { slot, detail }
    } else if ["manifest unknown", "pull access denied", "not found: manifest", "no such image"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        DeployError::ArtifactUnavailable {
            version: version.clone(),
            detail,
        }
    } else {
        DeployError::CommandFailed {
            command: spec.display(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{ScriptedRunner, fail, ok};

    const BOTH_RUNNING: &str = concat!(
        r#"{"Service":"backend","State":"running"}"#,
        "\n",
        r#"{"Service":"frontend","State":"running"}"#,
        "\n"
    );

    fn executor(runner: Arc<ScriptedRunner>, dir: &std::path::Path) -> ComposeExecutor {
        let mut config = SwitchyardConfig::scaffold("clinomic");
        config.project.state_dir = dir.to_path_buf();
        ComposeExecutor::from_config(&config, runner)
    }

    fn descriptor(version: &str, slot: Slot) -> DeploymentDescriptor {
        DeploymentDescriptor::new(ReleaseVersion::parse(version).unwrap(), slot)
    }

    #[test]
    fn parse_ps_ndjson_and_array() {
        let entries = parse_ps_output(BOTH_RUNNING).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service, "backend");

        let entries =
            parse_ps_output(r#"[{"Service":"frontend","State":"exited","Name":"x"}]"#).unwrap();
        assert_eq!(
            entries,
            vec![PsEntry {
                service: "frontend".to_string(),
                state: "exited".to_string()
            }]
        );

        assert!(parse_ps_output("  \n").unwrap().is_empty());
        assert!(parse_ps_output("not json").is_err());
    }

    #[tokio::test]
    async fn bring_up_pulls_then_starts_with_slot_env() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let exec = executor(runner.clone(), dir.path());

        exec.bring_up(&descriptor("v2", Slot::Green)).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].ends_with("ps --format json"));
        assert_eq!(
            calls[1],
            "docker compose -p clinomic-green -f docker-compose.bluegreen.yml pull backend frontend"
        );
        assert!(calls[2].contains("up -d --remove-orphans backend frontend"));

        let up = &runner.specs()[2];
        assert!(up.env.contains(&("APP_VERSION".to_string(), "v2".to_string())));
        assert!(up.env.contains(&("DEPLOY_SLOT".to_string(), "green".to_string())));
        assert!(up.env.contains(&("SLOT_PORT".to_string(), "8002".to_string())));

        let marker = fs::read_to_string(dir.path().join("green.version")).unwrap();
        assert_eq!(marker.trim(), "v2");
    }

    #[tokio::test]
    async fn bring_up_twice_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.once_then("ps --format json", ok(""), ok(BOTH_RUNNING));
        let exec = executor(runner.clone(), dir.path());

        exec.bring_up(&descriptor("v2", Slot::Blue)).await.unwrap();
        let after_first = runner.calls().len();
        exec.bring_up(&descriptor("v2", Slot::Blue)).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), after_first + 1);
        assert!(calls.last().unwrap().ends_with("ps --format json"));
        assert_eq!(
            exec.running_version(Slot::Blue).await.unwrap(),
            Some(ReleaseVersion::parse("v2").unwrap())
        );
    }

    #[tokio::test]
    async fn bring_up_different_version_redeploys() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("ps --format json", ok(BOTH_RUNNING));
        let exec = executor(runner.clone(), dir.path());
        fs::write(dir.path().join("blue.version"), "v1\n").unwrap();

        exec.bring_up(&descriptor("v2", Slot::Blue)).await.unwrap();
        assert!(runner.calls().iter().any(|c| c.contains(" up -d ")));
        assert_eq!(
            fs::read_to_string(dir.path().join("blue.version")).unwrap().trim(),
            "v2"
        );
    }

    #[tokio::test]
    async fn pull_failure_is_artifact_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(" pull ", fail("manifest for ghcr.io/clinomic/app:v9 not found"));
        let exec = executor(runner.clone(), dir.path());

        let err = exec.bring_up(&descriptor("v9", Slot::Green)).await.unwrap_err();
        assert!(matches!(err, DeployError::ArtifactUnavailable { ref version, .. } if version.as_str() == "v9"));
        assert!(!runner.calls().iter().any(|c| c.contains(" up ")));
        assert!(!dir.path().join("green.version").exists());
    }

    #[tokio::test]
    async fn port_conflict_is_resource_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            " up -d ",
            fail("Error response from daemon: Bind for 0.0.0.0:8002 failed: port is already allocated"),
        );
        let exec = executor(runner, dir.path());

        let err = exec.bring_up(&descriptor("v2", Slot::Green)).await.unwrap_err();
        assert!(matches!(err, DeployError::ResourceUnavailable { slot: Slot::Green, .. }));
    }

    #[tokio::test]
    async fn other_up_failures_are_command_failures() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(" up -d ", fail("service \"backend\" has neither an image nor a build context"));
        let exec = executor(runner, dir.path());

        let err = exec.bring_up(&descriptor("v2", Slot::Blue)).await.unwrap_err();
        assert!(matches!(err, DeployError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn bring_down_clears_marker_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let exec = executor(runner.clone(), dir.path());
        fs::write(dir.path().join("blue.version"), "v1\n").unwrap();

        exec.bring_down(Slot::Blue).await.unwrap();
        assert!(!dir.path().join("blue.version").exists());
        exec.bring_down(Slot::Blue).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.ends_with("-p clinomic-blue -f docker-compose.bluegreen.yml down --remove-orphans")));
        // Down keeps the last known version so compose can resolve images.
        assert!(runner.specs()[0]
            .env
            .contains(&("APP_VERSION".to_string(), "v1".to_string())));
    }

    #[tokio::test]
    async fn bring_down_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(" down ", fail("Cannot connect to the Docker daemon"));
        let exec = executor(runner, dir.path());
        assert!(matches!(
            exec.bring_down(Slot::Green).await,
            Err(DeployError::CommandFailed { .. })
        ));
    }

    #[tokio::test]
    async fn is_running_counts_only_slot_services() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "clinomic-blue",
            ok(r#"[{"Service":"backend","State":"running"},{"Service":"frontend","State":"exited"}]"#),
        );
        runner.on("clinomic-green", ok(r#"{"Service":"db","State":"running"}"#));
        let exec = executor(runner, dir.path());

        assert!(exec.is_running(Slot::Blue).await.unwrap());
        assert!(!exec.is_running(Slot::Green).await.unwrap());
        assert_eq!(exec.running_version(Slot::Green).await.unwrap(), None);
    }
}
