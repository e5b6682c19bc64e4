//! switchyard-compose — workload and proxy plumbing.
//!
//! Two capabilities used by the release controller, both built on an
//! injectable [`CommandRunner`]:
//!
//! - [`Executor`] / [`ComposeExecutor`]: start and stop one slot's
//!   service set as a separate compose project.
//! - [`TrafficSwitch`] / [`NginxSwitch`]: repoint the reverse proxy's
//!   upstream at a slot and reload it.

pub mod error;
pub mod executor;
pub mod proxy;
pub mod runner;

pub use error::{DeployError, DeployResult, ProxyError};
pub use executor::{ComposeExecutor, DeployFuture, Executor, PsEntry, parse_ps_output};
pub use proxy::{NginxSwitch, SwitchFuture, TrafficSwitch, render_upstream};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, RunFuture};
