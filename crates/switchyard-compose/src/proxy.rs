//! Reverse proxy switch.
//!
//! The live slot is expressed to nginx as a one-server upstream block in
//! an include file. Switching rewrites that file, validates it and
//! reloads nginx; if either command fails the previous file is put back.

use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use switchyard_core::{Slot, SwitchyardConfig};

use crate::error::ProxyError;
use crate::runner::{CommandRunner, CommandSpec};

/// Boxed future returned by [`TrafficSwitch::switch_to`].
pub type SwitchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProxyError>> + Send + 'a>>;

/// Points public traffic at one slot.
pub trait TrafficSwitch: Send + Sync {
    fn switch_to(&self, slot: Slot, port: u16) -> SwitchFuture<'_>;
}

/// Render the upstream include for `slot`.
pub fn render_upstream(name: &str, host: &str, port: u16, slot: Slot) -> String {
    format!(
        "# Managed by switchyard. Live slot: {slot}\n\
         upstream {name} {{\n    server {host}:{port};\n}}\n"
    )
}

/// [`TrafficSwitch`] for nginx.
pub struct NginxSwitch {
    runner: Arc<dyn CommandRunner>,
    upstream_file: PathBuf,
    upstream_name: String,
    upstream_host: String,
    test_command: Vec<String>,
    reload_command: Vec<String>,
}

impl NginxSwitch {
    pub fn from_config(config: &SwitchyardConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            upstream_file: config.proxy.upstream_file.clone(),
            upstream_name: config.proxy.upstream_name.clone(),
            upstream_host: config.proxy.upstream_host.clone(),
            test_command: config.proxy.test_command.clone(),
            reload_command: config.proxy.reload_command.clone(),
        }
    }

    pub fn upstream_file(&self) -> &Path {
        &self.upstream_file
    }

    /// Run `argv`; `Err` carries the diagnostic on spawn failure or non-zero exit.
    async fn run_step(&self, argv: &[String]) -> Result<(), String> {
        let Some(spec) = CommandSpec::from_argv(argv) else {
            return Ok(());
        };
        match self.runner.run(&spec).await {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(format!("`{}`: {}", spec.display(), output.diagnostic())),
            Err(e) => Err(format!("`{}`: {e}", spec.display())),
        }
    }

    fn restore(&self, previous: Option<&str>) {
        let result = match previous {
            Some(content) => write_atomic(&self.upstream_file, content),
            None => match fs::remove_file(&self.upstream_file) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        if let Err(e) = result {
            warn!(path = %self.upstream_file.display(), error = %e, "could not restore upstream file");
        }
    }

    async fn switch(&self, slot: Slot, port: u16) -> Result<(), ProxyError> {
        let previous = fs::read_to_string(&self.upstream_file).ok();
        let rendered = render_upstream(&self.upstream_name, &self.upstream_host, port, slot);

        if previous.as_deref() == Some(rendered.as_str()) {
            info!(%slot, port, "upstream already points at slot, reloading");
        }
        write_atomic(&self.upstream_file, &rendered).map_err(|e| ProxyError::Write(e.to_string()))?;

        if let Err(detail) = self.run_step(&self.test_command).await {
            warn!(%slot, %detail, "proxy config test failed, restoring previous upstream");
            self.restore(previous.as_deref());
            return Err(ProxyError::ConfigTest(detail));
        }

        if let Err(detail) = self.run_step(&self.reload_command).await {
            warn!(%slot, %detail, "proxy reload failed, restoring previous upstream");
            self.restore(previous.as_deref());
            return Err(ProxyError::Reload(detail));
        }

        info!(%slot, port, upstream = %self.upstream_name, "proxy now routes to slot");
        Ok(())
    }
}

impl TrafficSwitch for NginxSwitch {
    fn switch_to(&self, slot: Slot, port: u16) -> SwitchFuture<'_> {
        Box::pin(self.switch(slot, port))
    }
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".switchyard-tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}
