//! switchyard.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::types::Slot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchyardConfig {
    pub project: ProjectConfig,
    pub slots: SlotsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Compose project prefix; each slot runs as `{name}-{slot}`.
    pub name: String,
    pub compose_file: PathBuf,
    /// Compose CLI invocation, e.g. `["docker", "compose"]` or `["docker-compose"]`.
    #[serde(default = "default_compose_command")]
    pub compose_command: Vec<String>,
    /// Services that make up one slot. The shared database is not listed.
    pub services: Vec<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_slot")]
    pub default_slot: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotsConfig {
    pub blue: SlotEndpoint,
    pub green: SlotEndpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotEndpoint {
    /// Host port the slot's entry service publishes.
    pub port: u16,
    pub ready_url: String,
    pub live_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Wall-clock budget for one probe cycle (e.g. "120s").
    pub timeout: String,
    /// Delay between attempts (e.g. "5s").
    pub interval: String,
    pub max_attempts: u32,
    /// Bound on a single HTTP request.
    pub request_timeout: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: "120s".to_string(),
            interval: "5s".to_string(),
            max_attempts: 24,
            request_timeout: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// nginx include file holding the live upstream.
    pub upstream_file: PathBuf,
    #[serde(default = "default_upstream_name")]
    pub upstream_name: String,
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
    /// Command validating the rendered config, e.g. `["nginx", "-t"]`.
    #[serde(default)]
    pub test_command: Vec<String>,
    /// Command reloading the proxy, e.g. `["nginx", "-s", "reload"]`.
    pub reload_command: Vec<String>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/switchyard")
}

fn default_compose_command() -> Vec<String> {
    vec!["docker".to_string(), "compose".to_string()]
}

fn default_slot() -> Slot {
    Slot::Blue
}

fn default_upstream_name() -> String {
    "app_backend".to_string()
}

fn default_upstream_host() -> String {
    "127.0.0.1".to_string()
}

/// Problems found while validating a loaded configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("slots must use disjoint ports, both use {0}")]
    SharedPort(u16),

    #[error("slots must use distinct readiness URLs, both use {0}")]
    SharedReadyUrl(String),

    #[error("project.services must name at least one service")]
    NoServices,

    #[error("project.name must not be empty")]
    EmptyName,

    #[error("project.compose_command must not be empty")]
    NoComposeCommand,

    #[error("proxy.reload_command must not be empty")]
    NoReloadCommand,

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("health.max_attempts must be at least 1")]
    ZeroAttempts,
}

impl SwitchyardConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SwitchyardConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the invariants the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.project.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        if self.project.compose_command.is_empty() {
            return Err(ConfigError::NoComposeCommand);
        }
        // Both slots run side by side during a switch.
        if self.slots.blue.port == self.slots.green.port {
            return Err(ConfigError::SharedPort(self.slots.blue.port));
        }
        if self.slots.blue.ready_url == self.slots.green.ready_url {
            return Err(ConfigError::SharedReadyUrl(self.slots.blue.ready_url.clone()));
        }
        if self.proxy.reload_command.is_empty() {
            return Err(ConfigError::NoReloadCommand);
        }
        if self.health.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        self.health.timeout()?;
        self.health.interval()?;
        self.health.request_timeout()?;
        Ok(())
    }

    pub fn slot(&self, slot: Slot) -> &SlotEndpoint {
        match slot {
            Slot::Blue => &self.slots.blue,
            Slot::Green => &self.slots.green,
        }
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.project.state_dir.join("switchyard.redb")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.project.state_dir.join("switchyard.lock")
    }

    /// Scaffold a config for a two-slot project on one host.
    pub fn scaffold(name: &str) -> Self {
        let slot = |port: u16| SlotEndpoint {
            port,
            ready_url: format!("http://127.0.0.1:{port}/api/health/ready"),
            live_url: Some(format!("http://127.0.0.1:{port}/api/health/live")),
        };
        SwitchyardConfig {
            project: ProjectConfig {
                name: name.to_string(),
                compose_file: PathBuf::from("docker-compose.bluegreen.yml"),
                compose_command: default_compose_command(),
                services: vec!["backend".to_string(), "frontend".to_string()],
                state_dir: default_state_dir(),
                default_slot: default_slot(),
            },
            slots: SlotsConfig {
                blue: slot(8001),
                green: slot(8002),
            },
            health: HealthConfig::default(),
            proxy: ProxyConfig {
                upstream_file: PathBuf::from("/etc/nginx/conf.d/upstream.conf"),
                upstream_name: default_upstream_name(),
                upstream_host: default_upstream_host(),
                test_command: vec!["nginx".to_string(), "-t".to_string()],
                reload_command: vec![
                    "nginx".to_string(),
                    "-s".to_string(),
                    "reload".to_string(),
                ],
            },
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("health.timeout", &self.timeout)
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        duration_field("health.interval", &self.interval)
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("health.request_timeout", &self.request_timeout)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
